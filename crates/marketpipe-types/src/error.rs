use thiserror::Error;

/// A string did not match any known enum symbol.
///
/// Unrecognized values are rejected rather than coerced to a default so that
/// bad upstream data fails loudly at the parse boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {enum_name} value: '{value}'")]
pub struct ParseEnumError {
    pub enum_name: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(enum_name: &'static str, value: impl Into<String>) -> Self {
        Self {
            enum_name,
            value: value.into(),
        }
    }
}

/// Schema file loading and structural validation failures.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema directory not found: {0}")]
    DirNotFound(String),

    #[error("no schema file found for '{0}'")]
    FileNotFound(String),

    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid schema in {path}: missing required type:\"record\"")]
    NotARecord { path: String },

    #[error("invalid schema in {path}: missing or empty 'fields' array")]
    MissingFields { path: String },

    #[error("unsupported wire type in field '{field}': {detail}")]
    UnsupportedType { field: String, detail: String },

    #[error("avro rejected schema '{name}': {detail}")]
    AvroRejected { name: String, detail: String },
}

/// Structural mismatch between encoded bytes and the supplied schema.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("avro decode failed: {0}")]
    Avro(String),

    #[error("decoded value is not a record")]
    NotARecord,

    #[error("missing field '{0}' in decoded record")]
    MissingField(String),

    #[error("field '{field}' has unexpected type: expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Enum(#[from] ParseEnumError),
}

/// Delivery channel failures that the caller may observe synchronously.
///
/// Per-message delivery failures are swallowed (at-most-once local guarantee);
/// these cover setup problems only.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to create producer: {0}")]
    ProducerCreate(String),

    #[error("failed to create admin client: {0}")]
    AdminCreate(String),

    #[error("topic operation failed for '{topic}': {detail}")]
    Topic { topic: String, detail: String },

    #[error("serialization failed for key '{key}': {detail}")]
    Serialize { key: String, detail: String },
}
