pub mod manifest_utils;
pub mod obfuscation_utils;
pub mod upstream_utils;
