pub mod client;
pub mod config;
pub mod error;
pub mod expander;
pub mod graph;
pub mod store;
pub mod tag;

pub use client::{
    check_status, endpoint_url, DanbooruClient, RelationRecord, RequestThrottle, TagRecord, TagSource,
    ALIASES_ENDPOINT, IMPLICATIONS_ENDPOINT, TAGS_ENDPOINT,
};
pub use config::{
    expand_tilde, normalize_site_url, parse_delay, ExpanderConfig, DEFAULT_REQUEST_DELAY,
    DEFAULT_SITE_URL, DEFAULT_TIMEOUT,
};
pub use error::TagError;
pub use expander::{ProgressObserver, TagExpander};
pub use graph::{Expansion, GraphStats, RelationKind, SemanticRelations, TagGraph, TagNode};
pub use store::{
    graph_path_for_dir, has_legacy_json, import_json_cache, GraphStore, ImportReport,
    ImportWarning, GRAPH_CACHE_FILE,
};
pub use tag::{normalize_tag, normalize_tags, split_tag_input};
