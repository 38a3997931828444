//! Default values for every configuration field.

pub(super) fn default_true() -> bool {
    true
}
pub(super) fn default_name() -> String {
    "wapanel".to_string()
}
pub(super) fn default_data_dir() -> String {
    "~/.wapanel".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_host() -> String {
    "127.0.0.1".to_string()
}
pub(super) fn default_backend_port() -> u16 {
    3001
}
pub(super) fn default_request_timeout() -> u64 {
    30
}
pub(super) fn default_port_info() -> String {
    "~/.wapanel/.port-info.json".to_string()
}
pub(super) fn default_health_path() -> String {
    "/api/status".to_string()
}
pub(super) fn default_base_range() -> u16 {
    20
}
pub(super) fn default_window() -> u16 {
    2
}
pub(super) fn default_legacy_ranges() -> Vec<[u16; 2]> {
    vec![[5000, 5010]]
}
pub(super) fn default_probe_timeout_ms() -> u64 {
    3000
}
pub(super) fn default_max_rounds() -> u32 {
    5
}
pub(super) fn default_retry_delay_ms() -> u64 {
    2000
}
pub(super) fn default_socket_path() -> String {
    "/socket.io/".to_string()
}
pub(super) fn default_reconnect_delay_ms() -> u64 {
    2000
}
pub(super) fn default_max_reconnect_attempts() -> u32 {
    10
}
pub(super) fn default_event_buffer() -> usize {
    256
}
pub(super) fn default_store_backend() -> String {
    "sqlite".to_string()
}
pub(super) fn default_db_path() -> String {
    "~/.wapanel/data/state.db".to_string()
}
pub(super) fn default_completion_grace_secs() -> u64 {
    5
}
