use std::path::Path;

pub fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A catalog location with universal, device and equipment files. `boiler` names register 8200.
pub fn catalog_location(dir: &Path, boiler: &str) {
    write(
        &dir.join("universal_registers.json"),
        &format!(
            r#"{{"universal_registers": [
                {{"starting_address": 8200, "name": "{boiler}", "unit": "s16",
                  "unit_value_table": "1/10°C", "user_level": "read", "expert_level": "read", "index": ""}},
                {{"starting_address": "8210", "name": "Betriebsstunden", "unit": "u32",
                  "unit_value_table": "h", "user_level": "read", "expert_level": "read"}},
                {{"starting_address": 8220, "name": "Kessel", "unit": "u16",
                  "unit_value_table": "OnOff_t", "user_level": "readwrite", "expert_level": "readwrite"}},
                {{"starting_address": 8230, "name": "Servicecode", "unit": "u16",
                  "user_level": "none", "expert_level": "readwrite"}},
                {{"name": "ohne Adresse"}}
            ]}}"#
        ),
    );
    write(
        &dir.join("value_tables.json"),
        r#"{"value_tables": {"OnOff_t": {"0": "Aus", "1": "Ein"},
                             "Mode_t": {"0": "Aus", "1": "Auto", "2": "Heizen"}}}"#,
    );
    write(
        &dir.join("devices/kwb_cf2.json"),
        r#"{"registers": [
            {"starting_address": 8200, "name": "CF2 Kessel", "unit": "s16", "user_level": "read"},
            {"starting_address": 8300, "name": "Saugzug", "unit": "u16", "unit_value_table": "%",
             "user_level": "read", "expert_level": "read"}
        ]}"#,
    );
    write(
        &dir.join("equipment/heizkreise.json"),
        r#"{"registers": [
            {"starting_address": 9000, "name": "Vorlauf", "unit": "s16", "unit_value_table": "1/10°C",
             "user_level": "read", "expert_level": "read", "index": "HK 1.1"},
            {"starting_address": 9001, "name": "Betriebsart", "unit": "u16", "unit_value_table": "Mode_t",
             "user_level": "readwrite", "expert_level": "readwrite", "index": "HK 1.2"},
            {"starting_address": 9010, "name": "Vorlauf", "unit": "s16", "unit_value_table": "1/10°C",
             "user_level": "read", "expert_level": "read", "index": "HK 2.1"},
            {"starting_address": 9020, "name": "Vorlauf", "unit": "s16", "unit_value_table": "1/10°C",
             "user_level": "read", "expert_level": "read", "index": "HK 3.1"},
            {"starting_address": 8300, "name": "Doppelt", "unit": "u16",
             "user_level": "read", "expert_level": "read", "index": "HK 1.1"}
        ]}"#,
    );
    write(
        &dir.join("equipment/pufferspeicher.json"),
        r#"{"registers": [
            {"starting_address": 9100, "name": "Ladezustand", "unit": "u16", "unit_value_table": "%",
             "user_level": "read", "expert_level": "read", "index": "PUF 0"},
            {"starting_address": 9101, "name": "Ladezustand", "unit": "u16", "unit_value_table": "%",
             "user_level": "read", "expert_level": "read", "index": "PUF 1"}
        ]}"#,
    );
    write(&dir.join("equipment/solar.json"), "{ \"registers\": [");
}
