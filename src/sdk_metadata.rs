/// Identifies the SDK to the server. Sent with every request as `STATSIG-SDK-TYPE` and
/// `STATSIG-SDK-VERSION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkMetadata {
    /// SDK name. Usually, language name plus flavor.
    pub sdk_type: String,
    /// Version of SDK.
    pub sdk_version: String,
}

impl SdkMetadata {
    /// Default value for [`SdkMetadata::sdk_type`].
    pub const DEFAULT_SDK_TYPE: &'static str = "rust-server";

    /// Create metadata for a host SDK wrapping this crate.
    pub fn new(sdk_type: impl Into<String>, sdk_version: impl Into<String>) -> SdkMetadata {
        SdkMetadata {
            sdk_type: sdk_type.into(),
            sdk_version: sdk_version.into(),
        }
    }
}

impl Default for SdkMetadata {
    fn default() -> SdkMetadata {
        SdkMetadata::new(SdkMetadata::DEFAULT_SDK_TYPE, env!("CARGO_PKG_VERSION"))
    }
}
