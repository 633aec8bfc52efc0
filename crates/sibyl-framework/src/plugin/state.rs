//! Typed extension state shared between plugins.
//!
//! Plugins do not attach ad-hoc fields to the bot. Instead each plugin
//! declares named values in the [`ExtensionStore`]; the first declaration of
//! a key wins and any later attempt, from any plugin, is a
//! [`StateError::Collision`] naming the owner.
//!
//! ```rust,ignore
//! async fn init(ctx: PluginInitContext) -> anyhow::Result<()> {
//!     ctx.declare_state("seen.last", Mutex::new(HashMap::<String, Instant>::new()))?;
//!     Ok(())
//! }
//!
//! async fn seen(bot: Bot, msg: Arc<Message>, args: Vec<String>) -> Option<String> {
//!     let table = bot.state().get::<Mutex<HashMap<String, Instant>>>("seen.last")?;
//!     // ...
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::StateError;

struct Slot {
    owner: String,
    type_id: TypeId,
    value: Arc<dyn Any + Send + Sync>,
}

/// Key → value map with per-key ownership.
///
/// Values are stored behind `Arc`; plugins that need mutation store a type
/// with interior mutability.
#[derive(Default)]
pub struct ExtensionStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl ExtensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `key` for `owner` with an initial value.
    pub fn declare<T>(&self, owner: &str, key: &str, value: T) -> Result<Arc<T>, StateError>
    where
        T: Any + Send + Sync,
    {
        let mut slots = self.slots.write();
        if let Some(existing) = slots.get(key) {
            return Err(StateError::Collision {
                key: key.to_string(),
                owner: existing.owner.clone(),
            });
        }
        let value = Arc::new(value);
        slots.insert(
            key.to_string(),
            Slot {
                owner: owner.to_string(),
                type_id: TypeId::of::<T>(),
                value: value.clone(),
            },
        );
        Ok(value)
    }

    /// Fetches a value; `None` if absent or of a different type.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let slots = self.slots.read();
        let slot = slots.get(key)?;
        if slot.type_id != TypeId::of::<T>() {
            return None;
        }
        slot.value.clone().downcast::<T>().ok()
    }

    /// The namespace that declared `key`.
    pub fn owner(&self, key: &str) -> Option<String> {
        self.slots.read().get(key).map(|s| s.owner.clone())
    }

    /// Drops every key owned by `owner`.
    pub fn remove_namespace(&self, owner: &str) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, s| s.owner != owner);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
