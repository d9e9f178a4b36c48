//! Method listing for tooling.
//!
//! The listing is a snapshot taken when the table is built, so it always
//! includes itself and never changes afterwards.

use std::sync::Arc;

use crate::rpc::registry::{
    method_path, Described, FieldSchema, MessageSchema, MethodDescriptor, MethodTableBuilder,
};
use crate::rpc::status::RpcError;

pub const SERVICE: &str = "rpcmux.reflection.v1.ServerReflection";
pub const LIST_METHODS: &str = "ListMethods";

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListMethodsRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListMethodsResponse {
    #[prost(message, repeated, tag = "1")]
    pub methods: Vec<MethodInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MethodInfo {
    /// "/package.Service/Method"
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(message, optional, tag = "2")]
    pub request: Option<MessageInfo>,
    #[prost(message, optional, tag = "3")]
    pub response: Option<MessageInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub fields: Vec<FieldInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FieldInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub number: u32,
    #[prost(string, tag = "3")]
    pub kind: String,
}

impl Described for ListMethodsRequest {
    const SCHEMA: MessageSchema = MessageSchema {
        name: "rpcmux.reflection.v1.ListMethodsRequest",
        fields: &[],
    };
}

impl Described for ListMethodsResponse {
    const SCHEMA: MessageSchema = MessageSchema {
        name: "rpcmux.reflection.v1.ListMethodsResponse",
        fields: &[FieldSchema {
            name: "methods",
            number: 1,
            kind: "repeated rpcmux.reflection.v1.MethodInfo",
        }],
    };
}

impl From<&MessageSchema> for MessageInfo {
    fn from(schema: &MessageSchema) -> Self {
        MessageInfo {
            name: schema.name.to_string(),
            fields: schema
                .fields
                .iter()
                .map(|f| FieldInfo {
                    name: f.name.to_string(),
                    number: f.number,
                    kind: f.kind.to_string(),
                })
                .collect(),
        }
    }
}

fn describe(method: &MethodDescriptor) -> MethodInfo {
    MethodInfo {
        path: method.path(),
        request: Some(method.request_schema().into()),
        response: Some(method.response_schema().into()),
    }
}

/// Append the listing method to `methods` and return the full set.
pub(crate) fn install(methods: Vec<MethodDescriptor>) -> Vec<MethodDescriptor> {
    let mut listing: Vec<MethodInfo> = methods.iter().map(describe).collect();
    listing.push(MethodInfo {
        path: method_path(SERVICE, LIST_METHODS),
        request: Some((&ListMethodsRequest::SCHEMA).into()),
        response: Some((&ListMethodsResponse::SCHEMA).into()),
    });

    let listing = Arc::new(ListMethodsResponse { methods: listing });
    MethodTableBuilder::from_methods(methods)
        .unary(SERVICE, LIST_METHODS, move |_: ListMethodsRequest| {
            let listing = Arc::clone(&listing);
            async move { Ok::<_, RpcError>((*listing).clone()) }
        })
        .into_methods()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::echo;
    use crate::rpc::registry::MethodTable;
    use bytes::Bytes;
    use prost::Message;

    #[tokio::test]
    async fn lists_every_method_with_schemas() {
        let table = echo::register(MethodTable::builder())
            .with_reflection(true)
            .build()
            .unwrap();

        let out = table
            .call(&method_path(SERVICE, LIST_METHODS), Bytes::new())
            .await
            .unwrap();
        let listing = ListMethodsResponse::decode(out).unwrap();

        let paths: Vec<_> = listing.methods.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/echo.EchoService/Echo",
                "/rpcmux.reflection.v1.ServerReflection/ListMethods"
            ]
        );

        let echo = &listing.methods[0];
        let request = echo.request.as_ref().unwrap();
        assert_eq!(request.name, "echo.EchoMessage");
        assert_eq!(request.fields[0].name, "value");
        assert_eq!(request.fields[0].kind, "string");
    }

    #[test]
    fn reflection_disabled_by_builder() {
        let table = echo::register(MethodTable::builder()).build().unwrap();
        assert!(table.get(&method_path(SERVICE, LIST_METHODS)).is_none());
    }
}
