use tracing::debug;

use crate::registry::FunctionRegistry;

/// A pluggable extension: a name plus one registration entry point.
///
/// Registration is data-driven: the loader iterates a declared list and
/// invokes each entry point, which inserts the extension's callable(s)
/// into the registry. No code is loaded dynamically.
pub struct Extension {
    pub name: &'static str,
    pub register: fn(&mut FunctionRegistry),
}

/// Load a set of extensions into a registry.
pub fn load_extensions(registry: &mut FunctionRegistry, extensions: &[Extension]) {
    for extension in extensions {
        (extension.register)(registry);
        debug!(extension = extension.name, "Extension loaded");
    }
}
