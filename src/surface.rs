use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One externally invocable method with its parameter descriptors.
///
/// Descriptor fidelity is language-dependent: parameter names for the
/// interpreted pipeline, type names for the compiled one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<String>,
}

/// The callable surface of one artifact: an ordered mapping from method
/// name to parameter descriptors.
///
/// Built once per artifact version right after load/analyze and treated as
/// immutable for the life of the owning session. Serializes to a JSON map
/// whose key order is the method order, and re-parsing that map yields the
/// same surface, so the introspection-time and dispatch-time views cannot
/// drift.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallableSurface {
    methods: Vec<MethodSig>,
}

impl CallableSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method. A repeated name keeps its original position but
    /// takes the newer parameter list.
    pub fn insert(&mut self, name: impl Into<String>, params: Vec<String>) {
        let name = name.into();
        match self.methods.iter_mut().find(|m| m.name == name) {
            Some(existing) => existing.params = params,
            None => self.methods.push(MethodSig { name, params }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
    }

    pub fn params(&self, name: &str) -> Option<&[String]> {
        self.methods
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.params.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodSig> {
        self.methods.iter()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Serialize for CallableSurface {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.methods.len()))?;
        for method in &self.methods {
            map.serialize_entry(&method.name, &method.params)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CallableSurface {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SurfaceVisitor;

        impl<'de> Visitor<'de> for SurfaceVisitor {
            type Value = CallableSurface;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map from method name to parameter descriptor list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut surface = CallableSurface::new();
                while let Some((name, params)) = access.next_entry::<String, Vec<String>>()? {
                    surface.insert(name, params);
                }
                Ok(surface)
            }
        }

        deserializer.deserialize_map(SurfaceVisitor)
    }
}
