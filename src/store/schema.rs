pub const SCHEMA: &str = r#"
-- Users are the identities experiments and tags belong to
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Tokens are auth credentials; non-admin tokens must belong to a user
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,          -- argon2id hash with embedded salt
    token_lookup TEXT NOT NULL,        -- first 8 chars of ID for fast lookup
    is_admin INTEGER NOT NULL DEFAULT 0,  -- admin tokens only access /api/v1/admin/* routes

    -- User binding (required for non-admin tokens, NULL only for admin tokens)
    user_id TEXT REFERENCES users(id) ON DELETE CASCADE,

    -- Lifecycle
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT,            -- NULL = never
    last_used_at TEXT
);

-- Experiments are owned exclusively by one user
CREATE TABLE IF NOT EXISTS experiments (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT,
    researcher_name TEXT,
    protocol_text TEXT,
    status TEXT NOT NULL DEFAULT 'planning'
        CHECK (status IN ('planning', 'in_progress', 'completed', 'on_hold')),
    experiment_date TEXT,       -- YYYY-MM-DD
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT             -- NULL until first edit
);

-- Tags are scoped per owner; names are unique within an owner
CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'other'
        CHECK (category IN ('organism', 'reagent', 'technique', 'equipment', 'other')),
    color TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),

    UNIQUE(owner_id, name)
);

-- Many-to-many relationship between experiments and tags
CREATE TABLE IF NOT EXISTS experiment_tags (
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (experiment_id, tag_id)
);

-- Protocol documents attached to an experiment
CREATE TABLE IF NOT EXISTS protocols (
    id TEXT PRIMARY KEY,
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    storage_path TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Data files attached to an experiment
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    storage_path TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Recorded results; read-only through the API
CREATE TABLE IF NOT EXISTS results (
    id TEXT PRIMARY KEY,
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    title TEXT,
    storage_path TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Shares grant a non-owner view or edit access to one experiment
CREATE TABLE IF NOT EXISTS experiment_shares (
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    permission_level TEXT NOT NULL CHECK (permission_level IN ('view', 'edit')),
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (experiment_id, user_id)
);

-- Create indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_lookup ON tokens(token_lookup);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);
CREATE INDEX IF NOT EXISTS idx_experiments_owner ON experiments(owner_id);
CREATE INDEX IF NOT EXISTS idx_tags_owner ON tags(owner_id);
CREATE INDEX IF NOT EXISTS idx_experiment_tags_tag ON experiment_tags(tag_id);
CREATE INDEX IF NOT EXISTS idx_protocols_experiment ON protocols(experiment_id);
CREATE INDEX IF NOT EXISTS idx_files_experiment ON files(experiment_id);
CREATE INDEX IF NOT EXISTS idx_results_experiment ON results(experiment_id);
CREATE INDEX IF NOT EXISTS idx_shares_user ON experiment_shares(user_id);
"#;
