pub const SCHEMA: &str = r#"
-- Rolls: one imported batch of film frames
CREATE TABLE IF NOT EXISTS rolls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    path TEXT NOT NULL UNIQUE,
    film_stock TEXT NOT NULL,
    camera TEXT NOT NULL,
    lens TEXT,
    shoot_date TEXT NOT NULL,         -- YYYY-MM-DD
    lab_info TEXT,
    notes TEXT,

    -- Location (all four set or all NULL)
    lat REAL,
    lon REAL,
    city TEXT,
    country TEXT,

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_rolls_shoot_date ON rolls(shoot_date);

-- Photos: one imported image, owned by exactly one roll
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    roll_id INTEGER NOT NULL,
    filename TEXT NOT NULL,
    file_path TEXT NOT NULL UNIQUE,
    thumbnail_path TEXT,
    preview_path TEXT,
    rating INTEGER NOT NULL DEFAULT 0 CHECK (rating BETWEEN 0 AND 5),
    is_cover INTEGER NOT NULL DEFAULT 0,
    is_favorite INTEGER NOT NULL DEFAULT 0,

    -- Location override; inherited = copied from the roll, not a user override
    lat REAL,
    lon REAL,
    city TEXT,
    country TEXT,
    location_inherited INTEGER NOT NULL DEFAULT 0,

    -- EXIF sync state
    exif_synced INTEGER NOT NULL DEFAULT 0,
    exif_written_at TEXT,
    exif_user_comment TEXT,
    exif_description TEXT,
    exif_generation INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (roll_id) REFERENCES rolls(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_photos_roll ON photos(roll_id);
CREATE INDEX IF NOT EXISTS idx_photos_favorite ON photos(roll_id, is_favorite);
"#;

/// Column additions for databases created by earlier releases. Each one is
/// allowed to fail when the column already exists.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE rolls ADD COLUMN lat REAL",
    "ALTER TABLE rolls ADD COLUMN lon REAL",
    "ALTER TABLE rolls ADD COLUMN city TEXT",
    "ALTER TABLE rolls ADD COLUMN country TEXT",
    "ALTER TABLE photos ADD COLUMN is_favorite INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE photos ADD COLUMN city TEXT",
    "ALTER TABLE photos ADD COLUMN country TEXT",
    "ALTER TABLE photos ADD COLUMN location_inherited INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE photos ADD COLUMN exif_written_at TEXT",
    "ALTER TABLE photos ADD COLUMN exif_user_comment TEXT",
    "ALTER TABLE photos ADD COLUMN exif_description TEXT",
    "ALTER TABLE photos ADD COLUMN exif_generation INTEGER NOT NULL DEFAULT 0",
];
