//! Default value functions for configuration deserialization

pub fn default_ffmpeg_command() -> String {
    "ffmpeg".to_string()
}

pub fn default_output_dir() -> String {
    "streams".to_string()
}

pub fn default_state_file() -> String {
    "active-streams.json".to_string()
}

pub fn default_hls_segment_time() -> u32 {
    4
}

pub fn default_hls_list_size() -> u32 {
    10
}

pub fn default_throughput_interval() -> String {
    "2s".to_string()
}

pub fn default_udp_ip() -> String {
    "239.255.0.1".to_string()
}

pub fn default_udp_port() -> u16 {
    1234
}

pub fn default_udp_ttl() -> u32 {
    1
}

pub fn default_udp_mtu() -> u32 {
    1316
}

pub fn default_udp_max_port() -> u16 {
    u16::MAX
}

pub fn default_udp_startup_timeout() -> String {
    "10s".to_string()
}

pub fn default_profile_name() -> String {
    "medium".to_string()
}

pub fn default_max_concurrent_streams() -> usize {
    10
}
