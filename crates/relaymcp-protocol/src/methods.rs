//! Method names used on the wire.

/// Liveness probe, sent by either side
pub const PING: &str = "ping";

/// Invoke a tool
pub const TOOLS_CALL: &str = "tools/call";
/// List tools
pub const TOOLS_LIST: &str = "tools/list";
/// Read a resource
pub const RESOURCES_READ: &str = "resources/read";
/// List resources
pub const RESOURCES_LIST: &str = "resources/list";
/// Fetch a prompt
pub const PROMPTS_GET: &str = "prompts/get";
/// List prompts
pub const PROMPTS_LIST: &str = "prompts/list";

/// Progress for an in-flight request
pub const PROGRESS: &str = "notifications/progress";
/// Cancellation of an in-flight request
pub const CANCELLED: &str = "notifications/cancelled";

/// Server-initiated elicitation, notification form
pub const ELICITATION_REQUEST: &str = "elicitation/request";
/// Client answer to an `elicitation/request` notification
pub const ELICITATION_RESPONSE: &str = "elicitation/response";
/// Server-initiated elicitation, request form
pub const ELICITATION_CREATE: &str = "elicitation/create";
