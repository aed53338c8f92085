//! Node labels, relationship types and well-known property keys.

// ============================================================================
// Node labels
// ============================================================================

pub const REPOSITORY: &str = "Repository";
pub const DIRECTORY: &str = "Directory";
pub const FILE: &str = "File";
pub const AST_NODE: &str = "ASTNode";
pub const CODE_SUMMARY: &str = "CodeSummary";
pub const DOCUMENTATION: &str = "DocumentationNode";
pub const INVESTIGATION: &str = "Investigation";
pub const CANDIDATE: &str = "Candidate";
pub const SOURCE: &str = "Source";
pub const SINK: &str = "Sink";
pub const DATA_FLOW_PATH: &str = "DataFlowPath";
pub const REPORT: &str = "Report";

// ============================================================================
// Relationship types
// ============================================================================

pub const CONTAINS: &str = "CONTAINS";
pub const PART_OF: &str = "PART_OF";
pub const DEFINES: &str = "DEFINES";
pub const DESCRIBES: &str = "DESCRIBES";
pub const DECLARES: &str = "DECLARES";
pub const CALLS: &str = "CALLS";
pub const REFERENCES: &str = "REFERENCES";
pub const IDENTIFIES: &str = "IDENTIFIES";
pub const FOUND_IN: &str = "FOUND_IN";
pub const FLOWS_FROM: &str = "FLOWS_FROM";
pub const FLOWS_TO: &str = "FLOWS_TO";

// ============================================================================
// Property keys
// ============================================================================

/// Path synonyms an AST node may carry, in resolution order.
pub const PATH_KEYS: [&str; 3] = ["file_path", "path", "full_path"];

pub const MAPPING_STATUS: &str = "mapping_status";
pub const MAPPED_FILE_ID: &str = "mapped_file_id";
pub const MAPPING_STRATEGY: &str = "mapping_strategy";
pub const MAPPING_CANDIDATES: &str = "mapping_candidates";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_MAPPED: &str = "mapped";
pub const STATUS_UNMAPPED: &str = "unmapped";
pub const STATUS_AMBIGUOUS: &str = "ambiguous";

/// Kind labels attached to AST nodes next to [`AST_NODE`].
pub const AST_KINDS: [&str; 6] = ["Module", "Class", "Function", "Method", "Variable", "Parameter"];
