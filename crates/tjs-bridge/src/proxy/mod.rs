//! Foreign reference proxies
//!
//! A [`Proxy`] is the guest's handle to one host object. It caches
//! nothing: every read goes to the host object, and every write is
//! visible at once through all proxies to the same object. Cloning a
//! proxy shares its [`RefHandle`]; the host object is released when the
//! last clone drops.

pub mod handles;
pub mod lazy;
pub mod typed;

pub use handles::{HandleStats, HandleTable, RefHandle, RefId};
pub use lazy::LazyProxy;
pub use typed::{ImageSource, RawImageClassProxy, RawImageProxy, TensorProxy};

use std::fmt;
use std::sync::Arc;

use crate::bridge::{Completion, Deferred};
use crate::error::{BridgeError, BridgeResult, ForeignCallError, HostError, Operation};
use crate::host::{
    Capabilities, Capability, HostObject, HostRef, HostReturn, IndexKey, LibraryModule, RawImage,
    RawImageClass, Tensor,
};
use crate::instance::ModuleInstance;
use crate::marshal::{GuestValue, Marshaller};

/// What a proxy wraps, decided once when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Module,
    Tensor,
    RawImage,
    RawImageClass,
    Function,
    Object,
}

impl ProxyKind {
    fn of(object: &HostRef) -> Self {
        let any = object.as_any();
        if any.is::<LibraryModule>() {
            ProxyKind::Module
        } else if any.is::<Tensor>() {
            ProxyKind::Tensor
        } else if any.is::<RawImage>() {
            ProxyKind::RawImage
        } else if any.is::<RawImageClass>() {
            ProxyKind::RawImageClass
        } else if object.capabilities().has(Capability::Call) {
            ProxyKind::Function
        } else {
            ProxyKind::Object
        }
    }
}

/// Guest handle to a host object
#[derive(Clone)]
pub struct Proxy {
    handle: Arc<RefHandle>,
    kind: ProxyKind,
    class: String,
    capabilities: Capabilities,
    instance: Arc<ModuleInstance>,
}

impl Proxy {
    pub(crate) fn wrap(instance: &Arc<ModuleInstance>, object: HostRef) -> Self {
        let kind = ProxyKind::of(&object);
        let class = object.class_name().to_string();
        let capabilities = object.capabilities();
        Self {
            handle: Arc::new(RefHandle::new(instance.handles(), object)),
            kind,
            class,
            capabilities,
            instance: instance.clone(),
        }
    }

    pub fn id(&self) -> RefId {
        self.handle.id()
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The instance this proxy is rooted at
    pub fn instance(&self) -> &Arc<ModuleInstance> {
        &self.instance
    }

    /// Whether both proxies refer to the same host object
    pub fn same_object(&self, other: &Proxy) -> bool {
        match (self.host_object(), other.host_object()) {
            (Ok(a), Ok(b)) => std::ptr::addr_eq(Arc::as_ptr(&a), Arc::as_ptr(&b)),
            _ => false,
        }
    }

    pub(crate) fn host_object(&self) -> BridgeResult<HostRef> {
        self.instance.handles().resolve(self.id()).ok_or_else(|| {
            ForeignCallError::new(
                Operation::Get("<self>".to_string()),
                self.class.clone(),
                format!("{} is no longer held by the host", self.id()),
            )
            .into()
        })
    }

    fn require(&self, capability: Capability, operation: &Operation) -> BridgeResult<()> {
        if self.capabilities.has(capability) {
            Ok(())
        } else {
            Err(ForeignCallError::new(
                operation.clone(),
                self.class.clone(),
                format!("{} does not support {}", self.class, capability),
            )
            .into())
        }
    }

    fn fail(&self, operation: Operation, err: HostError) -> BridgeError {
        BridgeError::from_host(operation, &self.class, err)
    }

    fn marshaller(&self) -> Marshaller<'_> {
        Marshaller::new(&self.instance)
    }

    fn complete(&self, operation: Operation, ret: HostReturn) -> Completion {
        match ret {
            HostReturn::Value(value) => Completion::Ready(self.marshaller().from_host(value)),
            HostReturn::Deferred(work) => {
                Completion::Pending(Deferred::submit(&self.instance, operation, &self.class, work))
            }
        }
    }

    /// Member names of the host object
    pub fn keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.host_object()?.keys())
    }

    pub fn has(&self, name: &str) -> bool {
        self.keys().map(|keys| keys.iter().any(|k| k == name)).unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> BridgeResult<GuestValue> {
        let operation = Operation::Get(name.to_string());
        self.require(Capability::Get, &operation)?;
        let value = self
            .host_object()?
            .get(name)
            .map_err(|e| self.fail(operation, e))?;
        Ok(self.marshaller().from_host(value))
    }

    /// Member that must be a host object
    pub fn get_proxy(&self, name: &str) -> BridgeResult<Proxy> {
        Ok(self.get(name)?.into_proxy()?)
    }

    pub fn set(&self, name: &str, value: impl Into<GuestValue>) -> BridgeResult<()> {
        let operation = Operation::Set(name.to_string());
        self.require(Capability::Set, &operation)?;
        let value = self.marshaller().to_host(value.into())?;
        self.host_object()?
            .set(name, value)
            .map_err(|e| self.fail(operation, e))
    }

    pub fn index(&self, key: impl Into<IndexKey>) -> BridgeResult<GuestValue> {
        let key = key.into();
        let operation = Operation::Index(key.to_string());
        self.require(Capability::Index, &operation)?;
        let value = self
            .host_object()?
            .index(&key)
            .map_err(|e| self.fail(operation, e))?;
        Ok(self.marshaller().from_host(value))
    }

    pub fn set_item(&self, key: impl Into<IndexKey>, value: impl Into<GuestValue>) -> BridgeResult<()> {
        let key = key.into();
        let operation = Operation::SetItem(key.to_string());
        self.require(Capability::Index, &operation)?;
        let value = self.marshaller().to_host(value.into())?;
        self.host_object()?
            .set_item(&key, value)
            .map_err(|e| self.fail(operation, e))
    }

    /// Call the object: functions are invoked, classes are constructed
    pub fn call(&self, args: Vec<GuestValue>) -> BridgeResult<Completion> {
        let object = self.host_object()?;
        let args = self.marshaller().to_host_all(args)?;

        if self.capabilities.has(Capability::Call) {
            let ret = object.call(args).map_err(|e| self.fail(Operation::Call, e))?;
            Ok(self.complete(Operation::Call, ret))
        } else if self.capabilities.has(Capability::Construct) {
            let value = object
                .construct(args)
                .map_err(|e| self.fail(Operation::Construct, e))?;
            Ok(Completion::Ready(self.marshaller().from_host(value)))
        } else {
            Err(ForeignCallError::new(
                Operation::Call,
                self.class.clone(),
                format!("{} is not callable", self.class),
            )
            .into())
        }
    }

    pub fn call_method(&self, name: &str, args: Vec<GuestValue>) -> BridgeResult<Completion> {
        let operation = Operation::CallMethod(name.to_string());
        self.require(Capability::Get, &operation)?;
        let args = self.marshaller().to_host_all(args)?;
        let ret = self
            .host_object()?
            .invoke(name, args)
            .map_err(|e| self.fail(operation.clone(), e))?;
        Ok(self.complete(operation, ret))
    }

    pub fn construct(&self, args: Vec<GuestValue>) -> BridgeResult<GuestValue> {
        self.require(Capability::Construct, &Operation::Construct)?;
        let args = self.marshaller().to_host_all(args)?;
        let value = self
            .host_object()?
            .construct(args)
            .map_err(|e| self.fail(Operation::Construct, e))?;
        Ok(self.marshaller().from_host(value))
    }

    pub fn iter(&self) -> BridgeResult<Vec<GuestValue>> {
        self.require(Capability::Iterate, &Operation::Iterate)?;
        let items = self
            .host_object()?
            .iterate()
            .map_err(|e| self.fail(Operation::Iterate, e))?;
        Ok(items
            .into_iter()
            .map(|item| self.marshaller().from_host(item))
            .collect())
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProxyKind::Module => {
                let keys = self.keys().unwrap_or_default();
                write!(f, "{}({})", self.class, keys.join(", "))
            }
            _ => write!(f, "<{} {}>", self.class, self.id()),
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("class", &self.class)
            .field("instance", &self.instance.key())
            .finish()
    }
}
