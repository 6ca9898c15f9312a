use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or out-of-policy request: missing offset, inverted range,
    /// start in the past, empty room id.
    InvalidInput(&'static str),
    /// The requested range intersects an active reservation in the room.
    Overlap { room_id: String },
    NotFound(Ulid),
    /// Reservation id already stored.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Rejections caused by the request itself rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Overlap { room_id } => {
                write!(f, "reservation overlaps with an existing one in room {room_id}")
            }
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::Conflict(id) => write!(f, "reservation already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
