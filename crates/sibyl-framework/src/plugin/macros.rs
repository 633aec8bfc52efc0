/// Defines a [`PluginDescriptor`](crate::plugin::PluginDescriptor).
///
/// Plugins are explicit lists of items; nothing is discovered by inspecting
/// attributes at runtime.
///
/// ```rust,ignore
/// use sibyl::prelude::*;
///
/// async fn echo(_bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> String {
///     args.join(" ")
/// }
///
/// pub static ECHO: PluginDescriptor = define_plugin! {
///     /// Repeats what you say.
///     name: "echo",
///     items: [
///         command("echo", echo),
///         idle("heartbeat", |_bot| async { tracing::trace!("tick") })
///             .every(Duration::from_secs(60)),
///     ],
/// };
/// ```
///
/// The doc comment, if any, becomes [`PluginMetadata::desc`](crate::plugin::PluginMetadata).
#[macro_export]
macro_rules! define_plugin {
    (
        $(#[doc = $doc:literal])*
        name: $name:literal
        $(, items: [$($item:expr),* $(,)?])?
        $(,)?
    ) => {{
        const __SIBYL_META: $crate::plugin::PluginMetadata = $crate::plugin::PluginMetadata {
            version: ::std::env!("CARGO_PKG_VERSION"),
            desc: ::std::concat!("" $(, $doc)*),
        };

        fn __sibyl_plugin_create() -> $crate::plugin::Plugin {
            $crate::plugin::Plugin::__new(
                $name,
                ::std::vec![$($(
                    ::std::convert::Into::<$crate::plugin::PluginItem>::into($item)
                ),*)?],
                __SIBYL_META,
            )
        }

        $crate::plugin::PluginDescriptor {
            api_version: $crate::plugin::SIBYL_PLUGIN_API_VERSION,
            name:        $name,
            create:      __sibyl_plugin_create,
            metadata:    __SIBYL_META,
        }
    }};
}
