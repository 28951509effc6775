// providers/src/providers/mod.rs

//! The provider variants.

mod attr_getter;
mod collections;
mod context_resource;
mod factory;
mod object;
mod resource;
mod selector;
mod singleton;
mod state;
mod thread_local;

pub use attr_getter::AttrGetter;
pub use collections::{Dict, List};
pub use context_resource::ContextResource;
pub use factory::Factory;
pub use object::Object;
pub use resource::Resource;
pub use selector::{Selector, SelectorKey};
pub use singleton::Singleton;
pub use state::State;
pub use thread_local::ThreadLocalSingleton;
