//! Built-in tool implementations for Prism.
//!
//! The shipped tools are deterministic stubs: production backends (real
//! weather APIs, real search) are external collaborators and get injected
//! behind the same `Tool` trait. The stubs return plausible, repeatable
//! data so the pipeline and its tool loop can be exercised end-to-end
//! without network access.

pub mod calculator;
pub mod invoker;
pub mod weather;
pub mod web_search;

use std::sync::Arc;

use prism_core::ToolRegistry;

pub use invoker::{InvocationContext, ToolInvoker};

/// Create a registry with all built-in tools.
pub fn default_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(weather::WeatherTool));
    registry.register(Arc::new(web_search::WebSearchTool));
    registry.register(Arc::new(calculator::CalculatorTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_builtins() {
        let registry = default_registry();
        assert!(registry.get("weather").is_some());
        assert!(registry.get("web_search").is_some());
        assert!(registry.get("calculator").is_some());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn categories_cover_information_and_utility() {
        let registry = default_registry();
        let categories = registry.categories();
        assert!(categories.contains(&"information".to_string()));
        assert!(categories.contains(&"utility".to_string()));
    }
}
