//! Tools command handler.

use weft_core::tools::ToolRegistry;

pub fn list() {
    let registry = ToolRegistry::builtins();
    let width = registry
        .definitions()
        .iter()
        .map(|d| d.name.len())
        .max()
        .unwrap_or(0);
    for def in registry.definitions() {
        println!("{:<width$}  {}", def.name, def.description);
    }
}
