//! Member paths resolved against the default instance on first use

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::context::BridgeContext;
use crate::error::BridgeResult;
use crate::marshal::GuestValue;

/// A dotted path such as `RawImage.read` that loads the default library
/// version when called
///
/// Building paths does no work; nothing is resolved until [`call`](Self::call)
/// or [`resolve`](Self::resolve).
#[derive(Clone)]
pub struct LazyProxy {
    context: Arc<BridgeContext>,
    parents: Vec<String>,
    name: String,
}

impl LazyProxy {
    pub(crate) fn new(context: Arc<BridgeContext>, name: &str) -> Self {
        Self {
            context,
            parents: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn attr(&self, name: &str) -> LazyProxy {
        let mut parents = self.parents.clone();
        parents.push(self.name.clone());
        Self {
            context: self.context.clone(),
            parents,
            name: name.to_string(),
        }
    }

    pub fn path(&self) -> String {
        let mut segments = self.parents.clone();
        segments.push(self.name.clone());
        segments.join(".")
    }

    /// Value at the end of the path
    pub async fn resolve(&self) -> BridgeResult<GuestValue> {
        let instance = self.context.default_instance().await?;
        let mut value = GuestValue::Proxy(instance.module());
        for name in self.parents.iter().chain(std::iter::once(&self.name)) {
            value = value.into_proxy()?.get(name)?;
        }
        Ok(value)
    }

    /// Call the last segment as a method of the one before it and await
    /// the result
    pub async fn call(&self, args: Vec<GuestValue>) -> BridgeResult<GuestValue> {
        let instance = self.context.default_instance().await?;
        debug!(path = %self.path(), version = %instance.version(), "Calling lazy member");

        let mut target = instance.module();
        for name in &self.parents {
            target = target.get_proxy(name)?;
        }
        target.call_method(&self.name, args)?.await
    }
}

impl fmt::Display for LazyProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LazyProxy({})", self.path())
    }
}

impl fmt::Debug for LazyProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyProxy").field("path", &self.path()).finish()
    }
}
