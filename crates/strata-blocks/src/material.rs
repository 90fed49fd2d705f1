use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use bitflags::bitflags;
use serde::Deserialize;

/// Index into the material catalog. Id 0 is always air.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u16);

pub const AIR: MaterialId = MaterialId(0);

/// Highest emission level a material can declare; larger TOML values are clamped.
pub const MAX_EMISSION: u8 = 15;

impl MaterialId {
    #[inline]
    pub fn is_air(self) -> bool {
        self.0 == 0
    }
}

bitflags! {
    /// Which "topmost block" predicates a material satisfies.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TopFlags: u8 {
        /// Collidable: physics treats the block as ground.
        const SOLID = 0b01;
        /// Light-blocking: the block stops skylight.
        const OPAQUE = 0b10;
    }
}

#[derive(Clone, Debug)]
pub struct MaterialDef {
    pub id: MaterialId,
    pub name: String,
    pub solid: bool,
    pub opaque: bool,
    /// Emitted light level, 0..=15. Zero means not a light source.
    pub emission: u8,
}

#[derive(Default, Clone, Debug)]
pub struct MaterialCatalog {
    pub materials: Vec<MaterialDef>,
    pub by_name: HashMap<String, MaterialId>,
}

impl MaterialCatalog {
    /// Empty catalog holding only the reserved air material.
    pub fn new() -> Self {
        let mut catalog = Self {
            materials: Vec::new(),
            by_name: HashMap::new(),
        };
        catalog.push("air", false, false, 0);
        catalog
    }

    /// Built-in catalog used when no materials file is supplied.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        // Kept sorted so ids line up with a TOML file declaring the same names.
        catalog.push("dirt", true, true, 0);
        catalog.push("glass", true, false, 0);
        catalog.push("grass", true, true, 0);
        catalog.push("lava", true, true, 12);
        catalog.push("sand", true, true, 0);
        catalog.push("stone", true, true, 0);
        catalog.push("torch", false, false, 14);
        catalog.push("water", false, false, 0);
        catalog
    }

    fn push(&mut self, name: &str, solid: bool, opaque: bool, emission: u8) -> MaterialId {
        let id = MaterialId(self.materials.len() as u16);
        self.by_name.insert(name.to_string(), id);
        self.materials.push(MaterialDef {
            id,
            name: name.to_string(),
            solid,
            opaque,
            emission: emission.min(MAX_EMISSION),
        });
        id
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: MaterialsConfig = toml::from_str(toml_str)?;
        let mut catalog = MaterialCatalog::new();
        let mut entries: Vec<(String, MaterialEntry)> = cfg.materials.into_iter().collect();
        // HashMap iteration order is nondeterministic; sort names so MaterialId assignment is stable.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, entry) in entries {
            if name == "air" {
                return Err("material name 'air' is reserved (id 0)".into());
            }
            catalog.push(&name, entry.solid, entry.opaque, entry.emission);
        }
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn get(&self, id: MaterialId) -> Option<&MaterialDef> {
        self.materials.get(id.0 as usize)
    }

    pub fn id_by_name(&self, name: &str) -> Option<MaterialId> {
        self.by_name.get(name).copied()
    }

    /// Unknown ids behave like air.
    #[inline]
    pub fn is_solid(&self, id: MaterialId) -> bool {
        self.get(id).map(|m| m.solid).unwrap_or(false)
    }

    #[inline]
    pub fn is_opaque(&self, id: MaterialId) -> bool {
        self.get(id).map(|m| m.opaque).unwrap_or(false)
    }

    #[inline]
    pub fn emission(&self, id: MaterialId) -> u8 {
        self.get(id).map(|m| m.emission).unwrap_or(0)
    }

    #[inline]
    pub fn is_emissive(&self, id: MaterialId) -> bool {
        self.emission(id) > 0
    }

    /// Emission normalized to [0,1] for light intensity scaling.
    #[inline]
    pub fn emission_strength(&self, id: MaterialId) -> f32 {
        f32::from(self.emission(id)) / f32::from(MAX_EMISSION)
    }

    /// Set of top-of-column predicates this material satisfies. Air satisfies none.
    #[inline]
    pub fn top_flags(&self, id: MaterialId) -> TopFlags {
        let mut flags = TopFlags::empty();
        if let Some(m) = self.get(id) {
            if m.solid {
                flags |= TopFlags::SOLID;
            }
            if m.opaque {
                flags |= TopFlags::OPAQUE;
            }
        }
        flags
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

// --- Config ---

#[derive(Deserialize)]
struct MaterialsConfig {
    materials: HashMap<String, MaterialEntry>,
}

#[derive(Deserialize)]
struct MaterialEntry {
    #[serde(default)]
    solid: bool,
    #[serde(default)]
    opaque: bool,
    #[serde(default)]
    emission: u8,
}
