//! Plugin descriptors: the static, `Copy` handle to a plugin.

use super::Plugin;
use super::core::PluginMetadata;

// ─── API versioning ─────────────────────────────────────────────────────────────────────────────

/// Current Sibyl plugin API version (1.0).
pub const SIBYL_PLUGIN_API_VERSION: u32 = 0x0001_0000;

// ─── PluginDescriptor ─────────────────────────────────────────────────────────

/// A static, `Copy` descriptor that identifies and instantiates a plugin.
///
/// Use the [`define_plugin!`](crate::define_plugin) macro to create one; it
/// can be stored in a `static` item and handed to the runtime.
#[derive(Debug, Clone, Copy)]
pub struct PluginDescriptor {
    /// Plugin API version this descriptor was compiled against.
    pub api_version: u32,

    /// Plugin name: the namespace of its commands and its config key.
    pub name: &'static str,

    /// Factory function that creates the live [`Plugin`] instance.
    pub create: fn() -> Plugin,

    pub metadata: PluginMetadata,
}

impl PluginDescriptor {
    /// Returns `true` if this descriptor's API version is compatible with the
    /// running framework.
    ///
    /// The major part must match exactly; the descriptor's minor part must be
    /// ≤ the host's minor part.
    pub fn is_compatible(&self) -> bool {
        let host_major = SIBYL_PLUGIN_API_VERSION >> 16;
        let desc_major = self.api_version >> 16;
        let desc_minor = self.api_version & 0xFFFF;
        let host_minor = SIBYL_PLUGIN_API_VERSION & 0xFFFF;
        desc_major == host_major && desc_minor <= host_minor
    }

    #[inline]
    pub fn instantiate(&self) -> Plugin {
        (self.create)()
    }
}
