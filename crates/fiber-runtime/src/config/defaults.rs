//! Compile-time defaults, merged with an optional `FIBRT_CONFIG_RS` override
//! file by `build.rs`.

include!(concat!(env!("OUT_DIR"), "/fibrt_merged_config.rs"));
