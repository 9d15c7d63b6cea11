pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- campaigns table (one per delivery date)
CREATE TABLE IF NOT EXISTS campaigns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'draft',
    subject_line TEXT,
    review_sent_at TEXT,
    final_sent_at TEXT,
    status_before_send TEXT,
    metrics TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaigns(status);

-- content_items table (ingested source items, insert-only)
CREATE TABLE IF NOT EXISTS content_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER REFERENCES campaigns(id),
    source_id TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    external_id TEXT,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    description TEXT,
    body TEXT,
    author TEXT,
    image_url TEXT,
    published_at TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    UNIQUE(source_id, natural_key)
);

CREATE INDEX IF NOT EXISTS idx_content_items_campaign ON content_items(campaign_id);

-- ratings table (append-only, latest per item wins)
CREATE TABLE IF NOT EXISTS ratings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_item_id INTEGER NOT NULL REFERENCES content_items(id),
    total_score REAL NOT NULL,
    rated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ratings_item ON ratings(content_item_id, id DESC);

CREATE TABLE IF NOT EXISTS criterion_scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rating_id INTEGER NOT NULL REFERENCES ratings(id),
    criterion_id TEXT NOT NULL,
    score REAL NOT NULL,
    weight REAL NOT NULL,
    reason TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_criterion_scores_rating ON criterion_scores(rating_id);

-- articles table (campaign-bound rewrites)
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
    content_item_id INTEGER REFERENCES content_items(id),
    is_manual INTEGER NOT NULL DEFAULT 0,
    headline TEXT NOT NULL,
    content TEXT NOT NULL,
    word_count INTEGER NOT NULL DEFAULT 0,
    rank INTEGER,
    is_active INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    fact_check_score REAL,
    fact_check_details TEXT,
    review_position INTEGER,
    final_position INTEGER,
    created_at TEXT NOT NULL,
    UNIQUE(campaign_id, content_item_id)
);

CREATE INDEX IF NOT EXISTS idx_articles_campaign ON articles(campaign_id);

-- stage_runs table (one row per stage per cycle, claimed atomically)
CREATE TABLE IF NOT EXISTS stage_runs (
    stage TEXT NOT NULL,
    cycle_date TEXT NOT NULL,
    ran_at TEXT NOT NULL,
    PRIMARY KEY (stage, cycle_date)
);

-- events table
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    starts_at TEXT NOT NULL,
    venue TEXT,
    url TEXT,
    featured INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_events_starts_at ON events(starts_at);

CREATE TABLE IF NOT EXISTS campaign_events (
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
    event_id INTEGER NOT NULL REFERENCES events(id),
    position INTEGER NOT NULL,
    PRIMARY KEY (campaign_id, event_id)
);

-- archive tables (append-only, no uniqueness on campaign)
CREATE TABLE IF NOT EXISTS archived_articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_id INTEGER NOT NULL,
    campaign_id INTEGER NOT NULL,
    campaign_date TEXT NOT NULL,
    campaign_status TEXT NOT NULL,
    archive_reason TEXT NOT NULL,
    archived_at TEXT NOT NULL,
    content_item_id INTEGER,
    is_manual INTEGER NOT NULL,
    headline TEXT NOT NULL,
    content TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    rank INTEGER,
    is_active INTEGER NOT NULL,
    skipped INTEGER NOT NULL,
    fact_check_score REAL,
    fact_check_details TEXT,
    review_position INTEGER,
    final_position INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_archived_articles_campaign ON archived_articles(campaign_id, archive_reason);

CREATE TABLE IF NOT EXISTS archived_content_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_id INTEGER NOT NULL,
    campaign_id INTEGER NOT NULL,
    campaign_date TEXT NOT NULL,
    campaign_status TEXT NOT NULL,
    archive_reason TEXT NOT NULL,
    archived_at TEXT NOT NULL,
    source_id TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    external_id TEXT,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    description TEXT,
    body TEXT,
    author TEXT,
    image_url TEXT,
    published_at TEXT NOT NULL,
    ingested_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS archived_ratings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_id INTEGER NOT NULL,
    campaign_id INTEGER NOT NULL,
    campaign_date TEXT NOT NULL,
    campaign_status TEXT NOT NULL,
    archive_reason TEXT NOT NULL,
    archived_at TEXT NOT NULL,
    content_item_id INTEGER NOT NULL,
    total_score REAL NOT NULL,
    criteria TEXT NOT NULL,
    rated_at TEXT NOT NULL
);
"#;
