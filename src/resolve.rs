use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use strum::IntoEnumIterator;
use tracing::info;

use crate::catalog::Catalog;
use crate::registers::{AccessLevel, EquipmentCategory, EquipmentConfig, Mode, RegisterDefinition};

/// Equipment index prefixes and the category name shown for their instances.
const INSTANCE_PREFIXES: &[(&str, &str)] = &[
    ("HK", "Heizkreis"),
    ("PUF", "Pufferspeicher"),
    ("BWS", "Brauchwasserspeicher"),
    ("ZWQ", "Zweitwärmequelle"),
    ("ZIR", "Zirkulation"),
    ("SOL", "Solar"),
    ("KFS", "Kesselfolge"),
    ("WMZ", "Wärmemengenzähler"),
];

/// `Heizkreis 1.2: Vorlauftemperatur` for a register indexed `HK 1.2`.
///
/// Buffer storages are numbered from zero on the wire but from one for users.
pub fn friendly_name(name: &str, index: Option<&str>) -> String {
    let Some(index) = index.filter(|i| !i.is_empty()) else {
        return name.to_string();
    };
    if name.is_empty() {
        return String::new();
    }
    for (prefix, category) in INSTANCE_PREFIXES {
        let Some(id) = index.strip_prefix(prefix) else { continue };
        let id = id.trim();
        return match (*prefix, id.parse::<i64>()) {
            ("PUF", Ok(n)) => format!("{category} {}: {name}", n + 1),
            _ => format!("{category} {id}: {name}"),
        };
    }
    name.to_string()
}

fn index_of(register: &RegisterDefinition) -> &str {
    register.equipment_index.as_deref().unwrap_or_default()
}

/// The registers of the first `count` instances of `category`, in file order.
pub fn select_instances(
    category: EquipmentCategory,
    candidates: &[RegisterDefinition],
    count: u16,
) -> Vec<&RegisterDefinition> {
    match category {
        EquipmentCategory::HeatingCircuits => {
            let prefixes: Vec<String> = (1..=count).map(|i| format!("HK {i}.")).collect();
            candidates
                .iter()
                .filter(|r| prefixes.iter().any(|p| index_of(r).starts_with(p.as_str())))
                .collect()
        }
        EquipmentCategory::BufferStorage => {
            let indices: Vec<String> = (0..count).map(|i| format!("PUF {i}")).collect();
            candidates
                .iter()
                .filter(|r| indices.iter().any(|i| index_of(r) == i.as_str()))
                .collect()
        }
        _ => {
            let mut selected: Vec<&str> = Vec::new();
            for id in candidates.iter().filter_map(instance_of) {
                if selected.len() == usize::from(count) {
                    break;
                }
                if !selected.contains(&id) {
                    selected.push(id);
                }
            }
            candidates
                .iter()
                .filter(|r| instance_of(r).is_some_and(|id| selected.contains(&id)))
                .collect()
        }
    }
}

/// The trailing token of an equipment index, e.g. `2` for `BWS 2`.
fn instance_of(register: &RegisterDefinition) -> Option<&str> {
    index_of(register).split_whitespace().last()
}

/// A register as exposed to callers: its definition, display name and access descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedRegister {
    pub definition: RegisterDefinition,
    pub friendly_name: String,
    pub mode: Mode,
}

impl ResolvedRegister {
    pub fn new(definition: RegisterDefinition) -> Self {
        let friendly_name = friendly_name(&definition.name, definition.equipment_index.as_deref());
        let mode = definition.mode();
        Self { definition, friendly_name, mode }
    }

    pub fn address(&self) -> u16 {
        self.definition.address
    }
}

/// Resolved registers in merge order, one per address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedRegisterSet {
    registers: Vec<ResolvedRegister>,
    by_address: HashMap<u16, usize>,
}

impl ResolvedRegisterSet {
    pub fn get(&self, address: u16) -> Option<&ResolvedRegister> {
        self.by_address.get(&address).map(|&i| &self.registers[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResolvedRegister> {
        self.registers.iter()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

impl<'a> IntoIterator for &'a ResolvedRegisterSet {
    type Item = &'a ResolvedRegister;
    type IntoIter = std::slice::Iter<'a, ResolvedRegister>;
    fn into_iter(self) -> Self::IntoIter {
        self.registers.iter()
    }
}

/// Register lists feeding one resolution, in priority order.
#[derive(Clone, Debug, Default)]
pub struct RegisterSources {
    pub universal: Arc<[RegisterDefinition]>,
    pub device: Arc<[RegisterDefinition]>,
    pub equipment: Vec<(EquipmentCategory, Arc<[RegisterDefinition]>)>,
}

/// Merge `sources` into one register set visible at `level`.
///
/// Universal registers come first, then device registers, then equipment categories in their fixed
/// order. An address already taken by an earlier source is not replaced.
pub fn resolve(
    level: AccessLevel,
    sources: &RegisterSources,
    config: &EquipmentConfig,
) -> ResolvedRegisterSet {
    let mut set = ResolvedRegisterSet::default();
    let mut seen = HashSet::new();
    let mut accept = |candidate: &RegisterDefinition| {
        if level.permits(candidate) && seen.insert(candidate.address) {
            set.by_address.insert(candidate.address, set.registers.len());
            set.registers.push(ResolvedRegister::new(candidate.clone()));
        }
    };
    sources.universal.iter().chain(sources.device.iter()).for_each(&mut accept);
    for category in EquipmentCategory::iter() {
        let count = config.count(category);
        if count == 0 {
            continue;
        }
        let lists = sources.equipment.iter().filter(|(c, _)| *c == category);
        for (_, candidates) in lists {
            select_instances(category, candidates, count).into_iter().for_each(&mut accept);
        }
    }
    set
}

type ResolutionKey = (AccessLevel, String, EquipmentConfig);

/// Resolves register sets against one catalog, remembering every resolution.
#[derive(Debug)]
pub struct RegisterResolver {
    catalog: Arc<Catalog>,
    resolved: Mutex<HashMap<ResolutionKey, Arc<ResolvedRegisterSet>>>,
}

impl RegisterResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog, resolved: Mutex::new(HashMap::new()) }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Gather the sources needed for `device_type` and `config` from the catalog.
    pub async fn sources(&self, device_type: &str, config: &EquipmentConfig) -> RegisterSources {
        let device = match device_type {
            "" => Vec::new().into(),
            device_type => self.catalog.device_registers(device_type).await,
        };
        let loads = config.installed().map(|(category, _)| async move {
            (category, self.catalog.equipment_registers(category).await)
        });
        let equipment = futures::future::join_all(loads).await;
        RegisterSources {
            universal: self.catalog.universal_registers(),
            device,
            equipment,
        }
    }

    /// The register set for `level`, `device_type` and `config`. An empty device type selects no
    /// device registers.
    pub async fn load_registers(
        &self,
        level: AccessLevel,
        device_type: &str,
        config: &EquipmentConfig,
    ) -> Arc<ResolvedRegisterSet> {
        let key = (level, device_type.to_string(), *config);
        if let Some(set) = self.lock().get(&key) {
            return Arc::clone(set);
        }
        let sources = self.sources(device_type, config).await;
        let set = Arc::new(resolve(level, &sources, config));
        info!(
            message = "resolved registers",
            level = %level,
            device_type,
            equipment = %config,
            registers = set.len()
        );
        Arc::clone(self.lock().entry(key).or_insert(set))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ResolutionKey, Arc<ResolvedRegisterSet>>> {
        self.resolved.lock().unwrap_or_else(|e| e.into_inner())
    }
}
