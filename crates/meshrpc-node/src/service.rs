//! Service dispatcher
//!
//! Services are registered through an explicit [`ServiceBuilder`]: each method
//! is listed once with its handler, its shape is checked when the service is
//! built, and an ill-shaped service never reaches the dispatcher.
//!
//! A method's call kind follows from its shape, counted the way a handler
//! taking a request and filling a response would count its parameters:
//!
//! | parameters | kind  | request                      | response |
//! |------------|-------|------------------------------|----------|
//! | 1          | Send  | one value                    | none     |
//! | 2          | Call  | one value                    | one value|
//! | 3+         | Multi | all but the last, multi body | one value|
//!
//! # Example
//!
//! ```
//! use meshrpc_node::service::{Dispatcher, ServiceBuilder};
//! use meshrpc_common::protocol::Encoding;
//!
//! struct Greeter;
//!
//! let service = ServiceBuilder::new("Greeter", Greeter)
//!     .call("Hello", |_: &Greeter, name: String| Ok::<_, String>(format!("hello {}", name)))
//!     .build()
//!     .unwrap();
//!
//! let dispatcher = Dispatcher::new();
//! let service = dispatcher.register_service(service).unwrap();
//! let request = Encoding::Binary.encode("ada").unwrap();
//! let response = dispatcher.invoke(&service, "Hello", &request).unwrap();
//! let text: String = Encoding::Binary.decode(&response).unwrap();
//! assert_eq!(text, "hello ada");
//! ```

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use meshrpc_common::protocol::error::{MeshError, Result};
use meshrpc_common::protocol::identity::{is_exported, qualify};
use meshrpc_common::protocol::{CallKind, Encoding, MultiBody};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error message for a multi body whose segment count does not match the
/// method's arity.
pub const ARGS_MISMATCH: &str = "request args number were wrong";

/// Type-erased method: encoding of the service, raw request in, raw response out.
pub type RawHandler = Arc<dyn Fn(Encoding, &[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// Declared signature of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodShape {
    /// Non-receiver parameters, counting the response output.
    pub params: usize,
    /// Error-shaped results; exactly one is valid.
    pub error_results: usize,
    /// Type names of the parameters, for diagnostics.
    pub arg_types: Vec<&'static str>,
}

impl MethodShape {
    pub fn new(params: usize, error_results: usize) -> Self {
        Self {
            params,
            error_results,
            arg_types: Vec::new(),
        }
    }

    fn typed(error_results: usize, arg_types: Vec<&'static str>) -> Self {
        Self {
            params: arg_types.len(),
            error_results,
            arg_types,
        }
    }

    /// Classifies the shape by parameter count.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Registration` for zero parameters or anything but a
    /// single error result.
    pub fn classify(&self) -> Result<CallKind> {
        if self.error_results != 1 {
            return Err(MeshError::Registration(format!(
                "must return exactly one error, found {}",
                self.error_results
            )));
        }
        match self.params {
            0 => Err(MeshError::Registration("takes no parameters".to_string())),
            1 => Ok(CallKind::Send),
            2 => Ok(CallKind::Call),
            _ => Ok(CallKind::Multi),
        }
    }

    /// Request arguments carried by a multi body.
    pub fn request_args(&self) -> usize {
        self.params.saturating_sub(1)
    }
}

// ============================================================================
// Multi-argument requests
// ============================================================================

/// A tuple of request arguments carried as one multi body.
pub trait MultiArgs: Sized {
    const ARITY: usize;

    fn type_tags() -> Vec<&'static str>;

    /// Encodes each argument into its own segment.
    fn encode(&self, encoding: Encoding) -> Result<MultiBody>;

    /// Decodes one argument per segment.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Decode` with [`ARGS_MISMATCH`] when the segment
    /// count differs from the arity.
    fn decode(encoding: Encoding, body: MultiBody) -> Result<Self>;
}

macro_rules! impl_multi_args {
    ($arity:expr; $($ty:ident $idx:tt),+) => {
        impl<$($ty),+> MultiArgs for ($($ty,)+)
        where
            $($ty: Serialize + DeserializeOwned,)+
        {
            const ARITY: usize = $arity;

            fn type_tags() -> Vec<&'static str> {
                vec![$(std::any::type_name::<$ty>()),+]
            }

            fn encode(&self, encoding: Encoding) -> Result<MultiBody> {
                Ok(MultiBody::new(vec![$(encoding.encode(&self.$idx)?),+]))
            }

            fn decode(encoding: Encoding, body: MultiBody) -> Result<Self> {
                if body.len() != Self::ARITY {
                    return Err(MeshError::Decode(ARGS_MISMATCH.to_string()));
                }
                let mut segments = body.into_segments().into_iter();
                Ok(($({
                    let segment = segments
                        .next()
                        .ok_or_else(|| MeshError::Decode(ARGS_MISMATCH.to_string()))?;
                    encoding.decode::<$ty>(&segment)?
                },)+))
            }
        }
    };
}

impl_multi_args!(2; A 0, B 1);
impl_multi_args!(3; A 0, B 1, C 2);
impl_multi_args!(4; A 0, B 1, C 2, D 3);
impl_multi_args!(5; A 0, B 1, C 2, D 3, E 4);
impl_multi_args!(6; A 0, B 1, C 2, D 3, E 4, F 5);

// ============================================================================
// Descriptors
// ============================================================================

/// One invocable method of a built service.
#[derive(Clone)]
pub struct MethodEntry {
    name: String,
    kind: CallKind,
    shape: MethodShape,
    handler: RawHandler,
}

impl MethodEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn shape(&self) -> &MethodShape {
        &self.shape
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("shape", &self.shape)
            .finish()
    }
}

/// Validated method table of one registered service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    name: String,
    encoding: Encoding,
    methods: HashMap<String, MethodEntry>,
}

impl ServiceDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn method(&self, name: &str) -> Option<&MethodEntry> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodEntry> {
        self.methods.values()
    }

    /// `Service.Method` for every method, sorted.
    pub fn api_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().map(|m| qualify(&self.name, m)).collect();
        names.sort();
        names
    }
}

// ============================================================================
// Builder
// ============================================================================

struct PendingMethod {
    name: String,
    shape: MethodShape,
    handler: RawHandler,
}

/// Explicit registration table for one service object.
pub struct ServiceBuilder<S> {
    name: String,
    service: Arc<S>,
    markers: Vec<String>,
    methods: Vec<PendingMethod>,
}

impl<S: Send + Sync + 'static> ServiceBuilder<S> {
    pub fn new(name: impl Into<String>, service: S) -> Self {
        Self::shared(name, Arc::new(service))
    }

    /// Like [`ServiceBuilder::new`] for a service that is also used elsewhere.
    pub fn shared(name: impl Into<String>, service: Arc<S>) -> Self {
        Self {
            name: name.into(),
            service,
            markers: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Adds a fire-and-forget method.
    pub fn send<Req, E, F>(self, method: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + 'static,
        E: Display,
        F: Fn(&S, Req) -> std::result::Result<(), E> + Send + Sync + 'static,
    {
        let service = self.service.clone();
        let raw: RawHandler = Arc::new(move |encoding, request| {
            let request: Req = encoding.decode(request)?;
            handler(&*service, request).map_err(|e| MeshError::Handler(e.to_string()))?;
            Ok(Vec::new())
        });
        self.push(method, MethodShape::typed(1, vec![std::any::type_name::<Req>()]), raw)
    }

    /// Adds a request/response method.
    pub fn call<Req, Rsp, E, F>(self, method: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + 'static,
        Rsp: Serialize + 'static,
        E: Display,
        F: Fn(&S, Req) -> std::result::Result<Rsp, E> + Send + Sync + 'static,
    {
        let service = self.service.clone();
        let raw: RawHandler = Arc::new(move |encoding, request| {
            let request: Req = encoding.decode(request)?;
            let response = handler(&*service, request).map_err(|e| MeshError::Handler(e.to_string()))?;
            encoding.encode(&response)
        });
        let tags = vec![std::any::type_name::<Req>(), std::any::type_name::<Rsp>()];
        self.push(method, MethodShape::typed(1, tags), raw)
    }

    /// Adds a multi-argument method taking a tuple of request arguments.
    pub fn multi<Args, Rsp, E, F>(self, method: &str, handler: F) -> Self
    where
        Args: MultiArgs + 'static,
        Rsp: Serialize + 'static,
        E: Display,
        F: Fn(&S, Args) -> std::result::Result<Rsp, E> + Send + Sync + 'static,
    {
        let service = self.service.clone();
        let raw: RawHandler = Arc::new(move |encoding, request| {
            let args = Args::decode(encoding, MultiBody::decode(request)?)?;
            let response = handler(&*service, args).map_err(|e| MeshError::Handler(e.to_string()))?;
            encoding.encode(&response)
        });
        let mut tags = Args::type_tags();
        tags.push(std::any::type_name::<Rsp>());
        self.push(method, MethodShape::typed(1, tags), raw)
    }

    /// Adds a method with a hand-written shape and handler. The shape is
    /// validated by [`ServiceBuilder::build`].
    pub fn entry(self, method: &str, shape: MethodShape, handler: RawHandler) -> Self {
        self.push(method, shape, handler)
    }

    /// Declares an encoding by its marker name, e.g. `Encoding_JSON`.
    pub fn declare(mut self, marker: &str) -> Self {
        self.markers.push(marker.to_string());
        self
    }

    fn push(mut self, method: &str, shape: MethodShape, handler: RawHandler) -> Self {
        self.methods.push(PendingMethod {
            name: method.to_string(),
            shape,
            handler,
        });
        self
    }

    /// Validates every method and produces the descriptor.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Registration` when:
    /// - the service or a method name is not exported or contains a dot
    /// - a method name appears twice
    /// - a method's shape does not classify
    /// - an unknown encoding marker is declared
    /// - no invocable method remains
    pub fn build(self) -> Result<ServiceDescriptor> {
        if !is_exported(&self.name) || self.name.contains('.') {
            return Err(MeshError::Registration(format!(
                "service name {:?} is not exported",
                self.name
            )));
        }

        let mut encoding = Encoding::default();
        for marker in &self.markers {
            encoding = Encoding::from_marker(marker).ok_or_else(|| {
                MeshError::Registration(format!("{}: unknown encoding marker {}", self.name, marker))
            })?;
        }

        let mut methods = HashMap::new();
        for pending in self.methods {
            if let Some(declared) = Encoding::from_marker(&pending.name) {
                encoding = declared;
                continue;
            }
            let api_name = qualify(&self.name, &pending.name);
            if !is_exported(&pending.name) || pending.name.contains('.') {
                return Err(MeshError::Registration(format!("{} is not exported", api_name)));
            }
            if methods.contains_key(&pending.name) {
                return Err(MeshError::Registration(format!("{} registered twice", api_name)));
            }
            let kind = pending
                .shape
                .classify()
                .map_err(|e| MeshError::Registration(format!("{}: {}", api_name, e)))?;
            methods.insert(
                pending.name.clone(),
                MethodEntry {
                    name: pending.name,
                    kind,
                    shape: pending.shape,
                    handler: pending.handler,
                },
            );
        }

        if methods.is_empty() {
            return Err(MeshError::Registration(format!(
                "{} has no invocable methods",
                self.name
            )));
        }

        Ok(ServiceDescriptor {
            name: self.name,
            encoding,
            methods,
        })
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Services hosted by this process.
#[derive(Default)]
pub struct Dispatcher {
    services: RwLock<HashMap<String, Arc<ServiceDescriptor>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hosts a built service.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Registration` if a service with the same name is
    /// already hosted.
    pub fn register_service(&self, descriptor: ServiceDescriptor) -> Result<Arc<ServiceDescriptor>> {
        let mut services = self.services.write();
        if services.contains_key(descriptor.name()) {
            return Err(MeshError::Registration(format!(
                "service {} already registered",
                descriptor.name()
            )));
        }
        let descriptor = Arc::new(descriptor);
        services.insert(descriptor.name().to_string(), descriptor.clone());
        Ok(descriptor)
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.services.read().get(name).cloned()
    }

    pub fn hosts(&self, service: &str) -> bool {
        self.services.read().contains_key(service)
    }

    /// Whether `Service.Method` names a hosted method.
    pub fn hosts_method(&self, service: &str, method: &str) -> bool {
        self.services
            .read()
            .get(service)
            .is_some_and(|s| s.method(method).is_some())
    }

    pub fn services(&self) -> Vec<Arc<ServiceDescriptor>> {
        self.services.read().values().cloned().collect()
    }

    /// Runs one method with a raw request.
    ///
    /// # Errors
    ///
    /// - `MeshError::UnknownApi` if the service has no such method
    /// - `MeshError::Decode` if the request does not decode
    /// - `MeshError::Handler` if the method itself fails
    /// - `MeshError::Encode` if the response does not encode
    pub fn invoke(&self, descriptor: &ServiceDescriptor, method: &str, request: &[u8]) -> Result<Vec<u8>> {
        let entry = descriptor
            .method(method)
            .ok_or_else(|| MeshError::UnknownApi(qualify(descriptor.name(), method)))?;
        (entry.handler)(descriptor.encoding, request)
    }

    /// Looks up `service` and runs `method` on it.
    pub fn invoke_named(&self, service: &str, method: &str, request: &[u8]) -> Result<Vec<u8>> {
        let descriptor = self
            .service(service)
            .ok_or_else(|| MeshError::UnknownApi(qualify(service, method)))?;
        self.invoke(&descriptor, method, request)
    }
}
