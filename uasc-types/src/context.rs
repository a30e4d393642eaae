//! The encoding context: decoding options, the namespace and server tables,
//! and the type registry used to construct extension object bodies.

use std::{io::Read, sync::LazyLock};

use hashbrown::HashMap;

use crate::{
    encoding::{BinaryDecodable, DecodingOptions, EncodingResult},
    extension_object::DynEncodable,
    node_id::NodeId,
    variant::Variant,
};

type BinaryDecodeFn = fn(&mut dyn Read, &Context<'_>) -> EncodingResult<Box<dyn DynEncodable>>;

/// Decode the stream into a boxed dynamic value of the concrete type `T`.
/// This is what registry entries point at.
pub fn decode_as<T: DynEncodable + BinaryDecodable>(
    stream: &mut dyn Read,
    ctx: &Context<'_>,
) -> EncodingResult<Box<dyn DynEncodable>> {
    Ok(Box::new(T::decode(stream, ctx)?))
}

/// A bidirectional mapping between concrete encodable types and their binary
/// encoding node ids. Populated once at startup and read-only thereafter.
///
/// Lookup is constant time. Types map to ids through
/// [`MessageInfo`](crate::MessageInfo), so only id-to-constructor
/// lives here.
#[derive(Default)]
pub struct TypeRegistry {
    binary_types: HashMap<u32, BinaryDecodeFn>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder under both the data type id and the binary
    /// encoding id.
    pub fn add_binary_type(&mut self, data_type: u32, encoding_type: u32, fun: BinaryDecodeFn) {
        self.binary_types.insert(data_type, fun);
        self.binary_types.insert(encoding_type, fun);
    }

    /// True if the registry knows the id. Only numeric ids in namespace 0
    /// can be known.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        node_id.namespace == 0
            && node_id
                .as_u32()
                .map(|id| self.binary_types.contains_key(&id))
                .unwrap_or(false)
    }

    /// Construct and decode an instance of the type registered under
    /// `node_id`, or `None` if the id is unknown.
    pub fn decode_binary(
        &self,
        node_id: &NodeId,
        stream: &mut dyn Read,
        ctx: &Context<'_>,
    ) -> Option<EncodingResult<Box<dyn DynEncodable>>> {
        if node_id.namespace != 0 {
            return None;
        }
        let fun = self.binary_types.get(&node_id.as_u32()?)?;
        Some(fun(stream, ctx))
    }
}

/// The process-wide registry of the built-in service types, constructed on
/// first use from the service module's registration list.
static CORE_REGISTRY: LazyLock<TypeRegistry> = LazyLock::new(|| {
    let mut registry = TypeRegistry::new();
    crate::service::register_types(&mut registry);
    registry
});

/// Get the process wide registry of built-in types.
pub fn core_registry() -> &'static TypeRegistry {
    &CORE_REGISTRY
}

/// The table of namespace URIs on the connected server, indexed by the
/// namespace index used in node ids.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceMap {
    known_namespaces: HashMap<String, u16>,
}

/// The URI of namespace index 0, the OPC UA core namespace.
pub const BASE_NAMESPACE: &str = "http://opcfoundation.org/UA/";

impl Default for NamespaceMap {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceMap {
    /// Create a new namespace map containing only the base namespace.
    pub fn new() -> Self {
        let mut known_namespaces = HashMap::new();
        known_namespaces.insert(BASE_NAMESPACE.to_owned(), 0u16);
        Self { known_namespaces }
    }

    /// Build the map from the value of the Server_NamespaceArray variable.
    pub fn new_from_variant_array(array: &[Variant]) -> Result<Self, String> {
        let mut known_namespaces = HashMap::new();
        for (idx, value) in array.iter().enumerate() {
            let Variant::String(uri) = value else {
                return Err(format!(
                    "Namespace array contains a non-string element at {}",
                    idx
                ));
            };
            known_namespaces.insert(uri.as_ref().to_owned(), idx as u16);
        }
        Ok(Self { known_namespaces })
    }

    /// Add a namespace, returning its index.
    pub fn add_namespace(&mut self, namespace: &str) -> u16 {
        if let Some(idx) = self.known_namespaces.get(namespace) {
            return *idx;
        }
        let max = self.known_namespaces.values().max().copied().unwrap_or(0);
        self.known_namespaces.insert(namespace.to_owned(), max + 1);
        max + 1
    }

    /// Look up the index of a namespace URI.
    pub fn get_index(&self, namespace: &str) -> Option<u16> {
        self.known_namespaces.get(namespace).copied()
    }

    /// The inner map of URI to index.
    pub fn known_namespaces(&self) -> &HashMap<String, u16> {
        &self.known_namespaces
    }
}

/// Owned variant of [`Context`]. Clients store one of these per channel and
/// call [`ContextOwned::context`] to produce a [`Context`] for each
/// encoding or decoding operation.
pub struct ContextOwned {
    namespaces: NamespaceMap,
    servers: Vec<String>,
    registry: &'static TypeRegistry,
    options: DecodingOptions,
}

impl std::fmt::Debug for ContextOwned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextOwned")
            .field("namespaces", &self.namespaces)
            .field("servers", &self.servers)
            .field("options", &self.options)
            .finish()
    }
}

impl Default for ContextOwned {
    fn default() -> Self {
        Self::new(NamespaceMap::new(), DecodingOptions::default())
    }
}

impl ContextOwned {
    /// Create a context over the process-wide registry.
    pub fn new(namespaces: NamespaceMap, options: DecodingOptions) -> Self {
        Self {
            namespaces,
            servers: Vec::new(),
            registry: core_registry(),
            options,
        }
    }

    /// Produce a borrowed context for an encode or decode pass.
    pub fn context(&self) -> Context<'_> {
        Context {
            namespaces: &self.namespaces,
            registry: self.registry,
            options: self.options.clone(),
        }
    }

    /// The namespace table.
    pub fn namespaces(&self) -> &NamespaceMap {
        &self.namespaces
    }

    /// The namespace table, mutably.
    pub fn namespaces_mut(&mut self) -> &mut NamespaceMap {
        &mut self.namespaces
    }

    /// The server URI table from Server_ServerArray.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// The server URI table, mutably.
    pub fn servers_mut(&mut self) -> &mut Vec<String> {
        &mut self.servers
    }

    /// The decoding options.
    pub fn options(&self) -> &DecodingOptions {
        &self.options
    }

    /// The decoding options, mutably.
    pub fn options_mut(&mut self) -> &mut DecodingOptions {
        &mut self.options
    }
}

/// Decoding/encoding context. The lifetime is typically tied to an instance
/// of [`ContextOwned`].
#[derive(Clone)]
pub struct Context<'a> {
    namespaces: &'a NamespaceMap,
    registry: &'a TypeRegistry,
    options: DecodingOptions,
}

impl<'a> Context<'a> {
    /// Construct directly. Prefer [`ContextOwned`] outside of tests.
    pub fn new(
        namespaces: &'a NamespaceMap,
        registry: &'a TypeRegistry,
        options: DecodingOptions,
    ) -> Self {
        Self {
            namespaces,
            registry,
            options,
        }
    }

    /// The decoding options.
    pub fn options(&self) -> &DecodingOptions {
        &self.options
    }

    /// The namespace table.
    pub fn namespaces(&self) -> &'a NamespaceMap {
        self.namespaces
    }

    /// The type registry.
    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_core_types() {
        let registry = core_registry();
        // ReadRequest data type id and binary encoding id
        assert!(registry.contains(&NodeId::new(0, 629u32)));
        assert!(registry.contains(&NodeId::new(0, 631u32)));
        assert!(!registry.contains(&NodeId::new(0, 999_999u32)));
        assert!(!registry.contains(&NodeId::new(1, 631u32)));
    }

    #[test]
    fn namespace_map() {
        let mut map = NamespaceMap::new();
        assert_eq!(map.get_index(BASE_NAMESPACE), Some(0));
        let idx = map.add_namespace("urn:mine");
        assert_eq!(map.get_index("urn:mine"), Some(idx));

        let from_array = NamespaceMap::new_from_variant_array(&[
            Variant::from(BASE_NAMESPACE),
            Variant::from("urn:other"),
        ])
        .unwrap();
        assert_eq!(from_array.get_index("urn:other"), Some(1));
    }
}
