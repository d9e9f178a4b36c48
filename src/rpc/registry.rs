//! Enumerated method table.
//!
//! # Responsibilities
//! - Map "/package.Service/Method" to (decode request, invoke, encode response)
//! - Describe each method's message schemas for reflection
//! - Reject duplicate registrations at startup
//!
//! # Design Decisions
//! - Built once through [`MethodTableBuilder`], immutable afterwards
//! - Handlers are typed; the byte-level shims are generated at registration
//! - Registration order is preserved for listings

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::rpc::status::RpcError;

/// One field of a message schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: &'static str,
    pub number: u32,
    pub kind: &'static str,
}

/// Shape of a message type, as reported by reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSchema {
    pub name: &'static str,
    pub fields: &'static [FieldSchema],
}

/// Messages that can describe themselves.
pub trait Described {
    const SCHEMA: MessageSchema;
}

type UnaryHandler = dyn Fn(Bytes) -> BoxFuture<'static, Result<Bytes, RpcError>> + Send + Sync;

/// A registered method.
#[derive(Clone)]
pub struct MethodDescriptor {
    service: String,
    method: String,
    request: MessageSchema,
    response: MessageSchema,
    handler: Arc<UnaryHandler>,
}

impl MethodDescriptor {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// "/package.Service/Method"
    pub fn path(&self) -> String {
        method_path(&self.service, &self.method)
    }

    pub fn request_schema(&self) -> &MessageSchema {
        &self.request
    }

    pub fn response_schema(&self) -> &MessageSchema {
        &self.response
    }

    /// Decode, invoke and encode.
    pub fn invoke(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes, RpcError>> {
        (self.handler)(payload)
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("path", &self.path())
            .field("request", &self.request.name)
            .field("response", &self.response.name)
            .finish()
    }
}

pub fn method_path(service: &str, method: &str) -> String {
    format!("/{}/{}", service, method)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("method {0} registered twice")]
    Duplicate(String),
}

/// Immutable method table shared by every RPC connection.
#[derive(Debug, Default)]
pub struct MethodTable {
    by_path: HashMap<String, usize>,
    methods: Vec<MethodDescriptor>,
}

impl MethodTable {
    pub fn builder() -> MethodTableBuilder {
        MethodTableBuilder::default()
    }

    /// Look up by "/package.Service/Method".
    pub fn get(&self, path: &str) -> Option<&MethodDescriptor> {
        self.by_path.get(path).map(|&i| &self.methods[i])
    }

    /// Methods in registration order.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Invoke a method by path with an encoded request.
    pub async fn call(&self, path: &str, payload: Bytes) -> Result<Bytes, RpcError> {
        match self.get(path) {
            Some(method) => method.invoke(payload).await,
            None => Err(RpcError::unimplemented(format!("unknown method {}", path))),
        }
    }
}

/// Collects methods before freezing them into a [`MethodTable`].
#[derive(Default)]
pub struct MethodTableBuilder {
    methods: Vec<MethodDescriptor>,
    reflection: bool,
}

impl MethodTableBuilder {
    /// Register a unary method with typed request and response.
    pub fn unary<Req, Resp, F, Fut>(mut self, service: &str, method: &str, handler: F) -> Self
    where
        Req: prost::Message + Default + Described + 'static,
        Resp: prost::Message + Described + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let shim: Arc<UnaryHandler> = Arc::new(move |payload: Bytes| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let request = Req::decode(payload)
                    .map_err(|e| RpcError::invalid_argument(format!("malformed request: {}", e)))?;
                let response = handler(request).await?;
                Ok(Bytes::from(response.encode_to_vec()))
            })
        });

        self.methods.push(MethodDescriptor {
            service: service.to_string(),
            method: method.to_string(),
            request: Req::SCHEMA,
            response: Resp::SCHEMA,
            handler: shim,
        });
        self
    }

    pub(crate) fn from_methods(methods: Vec<MethodDescriptor>) -> Self {
        Self {
            methods,
            reflection: false,
        }
    }

    pub(crate) fn into_methods(self) -> Vec<MethodDescriptor> {
        self.methods
    }

    /// Also serve the method listing.
    pub fn with_reflection(mut self, enabled: bool) -> Self {
        self.reflection = enabled;
        self
    }

    pub fn build(self) -> Result<MethodTable, RegistryError> {
        let mut methods = self.methods;
        if self.reflection {
            methods = crate::rpc::reflection::install(methods);
        }

        let mut by_path = HashMap::with_capacity(methods.len());
        for (i, method) in methods.iter().enumerate() {
            if by_path.insert(method.path(), i).is_some() {
                return Err(RegistryError::Duplicate(method.path()));
            }
        }

        Ok(MethodTable { by_path, methods })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::echo::{self, EchoMessage};
    use crate::rpc::status::Code;
    use prost::Message;

    #[tokio::test]
    async fn dispatches_by_path() {
        let table = echo::register(MethodTable::builder()).build().unwrap();
        let request = EchoMessage {
            value: "ping".into(),
        };

        let out = table
            .call("/echo.EchoService/Echo", request.encode_to_vec().into())
            .await
            .unwrap();
        assert_eq!(EchoMessage::decode(out).unwrap().value, "ACK ping");
    }

    #[tokio::test]
    async fn unknown_path_is_unimplemented() {
        let table = echo::register(MethodTable::builder()).build().unwrap();
        let err = table.call("/echo.EchoService/Hello", Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[tokio::test]
    async fn undecodable_request_is_invalid_argument() {
        let table = echo::register(MethodTable::builder()).build().unwrap();
        let err = table
            .call("/echo.EchoService/Echo", Bytes::from_static(&[0x0a, 0x10, 0x01]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let builder = echo::register(echo::register(MethodTable::builder()));
        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::Duplicate("/echo.EchoService/Echo".into())
        );
    }
}
