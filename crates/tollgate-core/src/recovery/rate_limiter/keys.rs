//! Rate limit key composition

use super::types::KeyMode;

const TOOL_SEGMENT: &str = "tool";
const GLOBAL_SEGMENT: &str = "global";
const IP_SEGMENT: &str = "ip";

/// Build the counter key for a request.
///
/// - per-tool: `prefix:tool:<tool>:<client_id>`
/// - global: `prefix:global:<client_id>`
/// - ip-based: `prefix:ip:<client_id>`
/// - custom: `prefix:<client_id>`
pub fn generate_key(prefix: &str, mode: KeyMode, tool: &str, client_id: &str) -> String {
    match mode {
        KeyMode::PerTool => format!("{}:{}:{}:{}", prefix, TOOL_SEGMENT, tool, client_id),
        KeyMode::Global => format!("{}:{}:{}", prefix, GLOBAL_SEGMENT, client_id),
        KeyMode::IpBased => format!("{}:{}:{}", prefix, IP_SEGMENT, client_id),
        KeyMode::Custom => format!("{}:{}", prefix, client_id),
    }
}

/// Recover the tool name from a per-tool key, `None` for any other shape.
///
/// Tool names must not contain `:`; client ids may.
pub fn extract_tool_name<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?.strip_prefix(':')?;
    let rest = rest.strip_prefix(TOOL_SEGMENT)?.strip_prefix(':')?;
    let (tool, _client_id) = rest.split_once(':')?;
    if tool.is_empty() { None } else { Some(tool) }
}
