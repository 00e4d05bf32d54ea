use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::registers::{DataType, RegisterDefinition};
use crate::value_tables::{ValueTable, ValueTables};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("`{0}` is not a number, but register {1} expects one")]
    NotNumeric(String, u16),
}

static SCALING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^1/(\d+)").expect("scaling pattern is a valid regex"));

/// Physical unit suffixes. A token equal to or ending with one of these carries a numeric quantity.
const UNIT_SUFFIXES: &[&str] = &[
    "°C", "°F", "K", "bar", "mbar", "Pa", "kPa", "MPa", "W", "kW", "MW", "J", "kJ", "MJ", "Wh",
    "kWh", "MWh", "V", "A", "mA", "Hz", "Ohm", "kg", "g", "t", "l", "ml", "m", "cm", "mm", "km",
    "m²", "m³", "s", "min", "h", "%", "rpm", "1/min", "/min",
];

/// Additional spellings that rule out a value table reference.
const SCALED_UNIT_FORMS: &[&str] = &["1/10°C", "1/100°C", "Upm"];

const BOOLEAN_LABEL_PAIRS: &[[&str; 2]] = &[
    ["0", "1"],
    ["false", "true"],
    ["off", "on"],
    ["disabled", "enabled"],
    ["aus", "ein"],
];

const ON_KEYWORDS: &[&str] = &["on", "ein", "enabled", "true", "1"];
const OFF_KEYWORDS: &[&str] = &["off", "aus", "disabled", "false", "0"];

fn ends_with_any(token: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|s| token == *s || token.ends_with(s))
}

/// A `1/{N}{unit}` token: the wire integer is the quantity multiplied by `divisor`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scaling<'a> {
    pub divisor: u32,
    pub unit: &'a str,
}

impl<'a> Scaling<'a> {
    pub fn parse(token: &'a str) -> Option<Self> {
        let captures = SCALING.captures(token)?;
        let digits = captures.get(1)?;
        let divisor = digits.as_str().parse::<u32>().ok().filter(|&d| d != 0)?;
        Some(Self { divisor, unit: &token[digits.end()..] })
    }

    pub fn step(&self) -> f64 {
        1.0 / f64::from(self.divisor)
    }
}

/// A domain value: what a register means once its wire integer has been interpreted.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i64),
    /// A scaled quantity, rounded to three decimal places.
    Number(f64),
    /// A value table label.
    Label(String),
}

impl Value {
    /// Interpret user input: integers, then decimals, and anything else as a label.
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();
        if let Ok(n) = trimmed.parse::<i64>() {
            Value::Integer(n)
        } else if let Ok(n) = trimmed.parse::<f64>() {
            Value::Number(n)
        } else {
            Value::Label(input.to_string())
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Number(n) => Some(*n),
            Value::Label(s) => s.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Label(s) => f.write_str(s),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Label(s) => serializer.serialize_str(s),
        }
    }
}

/// Label rendered for codes missing from their value table.
pub fn unknown_label(code: i64) -> String {
    format!("Unknown ({code})")
}

fn parse_unknown_label(label: &str) -> Option<i64> {
    let (_, rest) = label.split_once("Unknown (")?;
    let (code, _) = rest.split_once(')')?;
    code.trim().parse().ok()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceClass {
    Temperature,
    Pressure,
    Power,
    Voltage,
    Current,
    Frequency,
}

pub fn unit_to_class(unit: &str) -> Option<DeviceClass> {
    Some(match unit {
        "°C" | "°F" => DeviceClass::Temperature,
        "bar" | "Pa" => DeviceClass::Pressure,
        "kW" | "W" => DeviceClass::Power,
        "V" => DeviceClass::Voltage,
        "A" => DeviceClass::Current,
        "Hz" => DeviceClass::Frequency,
        _ => return None,
    })
}

/// The value range a register of `data_type` can carry on the wire.
pub fn bounds_for_type(data_type: Option<DataType>) -> (f64, f64) {
    match data_type {
        Some(DataType::S16) => (-32768.0, 32767.0),
        Some(DataType::U16) => (0.0, 65535.0),
        Some(DataType::U32 | DataType::S32) => (0.0, 4294967295.0),
        _ => (0.0, 1_000_000.0),
    }
}

pub fn step_for(token: &str) -> f64 {
    Scaling::parse(token).map_or(1.0, |s| s.step())
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Declared catalog bounds where present, the wire range of the data type otherwise.
pub fn bounds(register: &RegisterDefinition) -> Bounds {
    let (type_min, type_max) = bounds_for_type(register.data_type);
    Bounds {
        min: register.min.unwrap_or(type_min),
        max: register.max.unwrap_or(type_max),
        step: step_for(&register.unit_or_table),
    }
}

/// How a resolved register is best presented to a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Presentation {
    Sensor,
    Number,
    Select,
    Switch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwitchCodes {
    pub on: i64,
    pub off: i64,
}

/// Bidirectional conversion between wire integers and domain values.
///
/// Cheap to clone; all clones share the same value tables.
#[derive(Clone, Debug, Default)]
pub struct ValueConverter {
    tables: Arc<ValueTables>,
}

impl ValueConverter {
    pub fn new(tables: Arc<ValueTables>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &ValueTables {
        &self.tables
    }

    /// Interpret the unsigned wire integer of `register`.
    pub fn raw_to_value(&self, register: &RegisterDefinition, raw: i64) -> Value {
        let token = register.unit_or_table.as_str();
        if register.data_type == Some(DataType::F32) {
            let number = f64::from(f32::from_bits(raw as u32));
            return Value::Number(match Scaling::parse(token) {
                Some(scaling) => round3(number / f64::from(scaling.divisor)),
                None => number,
            });
        }
        let signed = register.data_type.map_or(raw, |t| t.to_signed(raw));
        if token.is_empty() {
            return Value::Integer(signed);
        }
        if let Some(table) = self.tables.lookup(token) {
            return Value::Label(match table.label_of(&signed.to_string()) {
                Some(label) => label.to_owned(),
                None => {
                    debug!(message = "code not in value table", token, code = signed);
                    unknown_label(signed)
                }
            });
        }
        if let Some(scaling) = Scaling::parse(token) {
            return Value::Number(round3(signed as f64 / f64::from(scaling.divisor)));
        }
        // Unresolved `_t` references end with the `t` unit suffix and stay plain integers.
        Value::Integer(signed)
    }

    /// Encode `value` into the unsigned wire integer of `register`.
    pub fn value_to_raw(&self, register: &RegisterDefinition, value: &Value) -> Result<i64, Error> {
        let token = register.unit_or_table.as_str();
        if register.data_type == Some(DataType::F32) {
            let number = self.number(register, value)?;
            let scaled = Scaling::parse(token).map_or(number, |s| number * f64::from(s.divisor));
            return Ok(i64::from((scaled as f32).to_bits()));
        }
        let signed = if token.is_empty() {
            self.number(register, value)?.trunc() as i64
        } else if let Some(table) = self.tables.lookup(token) {
            code_for_label(table, &value.to_string())
        } else if let Some(scaling) = Scaling::parse(token) {
            let number = self.number(register, value)?;
            (number * f64::from(scaling.divisor)).round_ties_even() as i64
        } else {
            self.number(register, value)?.trunc() as i64
        };
        Ok(register.data_type.map_or(signed, |t| t.to_unsigned(signed)))
    }

    fn number(&self, register: &RegisterDefinition, value: &Value) -> Result<f64, Error> {
        value.as_f64().ok_or_else(|| Error::NotNumeric(value.to_string(), register.address))
    }

    /// Whether `token` names a value table, either loaded or (heuristically) missing.
    pub fn is_value_table(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        if self.tables.contains(token) {
            return true;
        }
        if ends_with_any(token, UNIT_SUFFIXES) || ends_with_any(token, SCALED_UNIT_FORMS) {
            return false;
        }
        token.ends_with("_t")
    }

    pub fn is_numeric(&self, register: &RegisterDefinition) -> bool {
        let token = register.unit_or_table.as_str();
        if self.is_value_table(token) {
            return false;
        }
        if Scaling::parse(token).is_some() || ends_with_any(token, UNIT_SUFFIXES) {
            return true;
        }
        token.is_empty()
    }

    /// A two-entry table whose labels read as a boolean pair, e.g. `Aus`/`Ein`.
    pub fn is_boolean_value_table(&self, token: &str) -> bool {
        let Some(table) = self.tables.lookup(token) else {
            return false;
        };
        if table.len() != 2 {
            return false;
        }
        let mut labels: Vec<String> = table.iter().map(|(_, l)| l.to_lowercase()).collect();
        labels.sort();
        BOOLEAN_LABEL_PAIRS.iter().any(|pair| labels == pair)
    }

    /// The display unit of a scaling token, e.g. `°C` for `1/10°C`.
    pub fn unit_of_measurement<'a>(&self, token: &'a str) -> Option<&'a str> {
        if token.is_empty() || self.tables.contains(token) {
            return None;
        }
        match Scaling::parse(token)?.unit {
            "" => None,
            "l" => Some("L"),
            unit => Some(unit),
        }
    }

    pub fn device_class(&self, token: &str) -> Option<DeviceClass> {
        unit_to_class(self.unit_of_measurement(token)?)
    }

    /// The ordered options of the register's value table; empty when it has none.
    pub fn options(&self, register: &RegisterDefinition) -> Vec<(&str, &str)> {
        self.tables
            .lookup(&register.unit_or_table)
            .map(|t| t.iter().collect())
            .unwrap_or_default()
    }

    pub fn display_value(&self, register: &RegisterDefinition, raw: i64) -> Option<String> {
        self.tables.lookup(&register.unit_or_table)?;
        Some(self.raw_to_value(register, raw).to_string())
    }

    pub fn presentation(&self, register: &RegisterDefinition) -> Presentation {
        let read_write = register.user_level.is_read_write();
        let token = register.unit_or_table.as_str();
        if read_write && self.is_value_table(token) {
            if self.is_boolean_value_table(token) {
                Presentation::Switch
            } else {
                Presentation::Select
            }
        } else if read_write && self.is_numeric(register) {
            Presentation::Number
        } else {
            Presentation::Sensor
        }
    }

    /// Wire codes for the on and off states of a boolean table.
    pub fn switch_codes(&self, token: &str) -> Option<SwitchCodes> {
        let table = self.tables.lookup(token)?;
        let (mut on, mut off) = (None, None);
        for (code, label) in table.iter() {
            let Ok(code) = code.trim().parse::<i64>() else { continue };
            let label = label.to_lowercase();
            if ON_KEYWORDS.iter().any(|k| label.contains(k)) {
                on = Some(code);
            } else if OFF_KEYWORDS.iter().any(|k| label.contains(k)) {
                off = Some(code);
            }
        }
        if let (Some(on), Some(off)) = (on, off) {
            return Some(SwitchCodes { on, off });
        }
        let mut codes: Vec<i64> = table.iter().filter_map(|(c, _)| c.trim().parse().ok()).collect();
        codes.sort_unstable();
        match codes[..] {
            [off, on] => Some(SwitchCodes { on, off }),
            _ => None,
        }
    }
}

fn code_for_label(table: &ValueTable, label: &str) -> i64 {
    let matched = table
        .iter()
        .filter(|&(_, l)| l == label)
        .find_map(|(code, _)| code.trim().parse().ok());
    matched.or_else(|| parse_unknown_label(label)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_tables::ValueTable;

    fn converter() -> ValueConverter {
        let tables = [
            ("OnOff_t", ValueTable::from_entries([("0", "Aus"), ("1", "Ein")])),
            ("Mode_t", ValueTable::from_entries([("0", "Aus"), ("1", "Auto"), ("2", "Heizen")])),
            ("Level_t", ValueTable::from_entries([("1", "Low"), ("2", "High")])),
            ("Offset_t", ValueTable::from_entries([("-1", "Minus"), ("0", "Null"), ("1", "Plus")])),
        ];
        ValueConverter::new(Arc::new(tables.into_iter().map(|(n, t)| (n.to_string(), t)).collect()))
    }

    fn reg(data_type: DataType, token: &str) -> RegisterDefinition {
        RegisterDefinition::new(100, "test", data_type).with_token(token)
    }

    #[test]
    fn plain_and_signed_values() {
        let c = converter();
        assert_eq!(c.raw_to_value(&reg(DataType::U16, ""), 65535), Value::Integer(65535));
        assert_eq!(c.raw_to_value(&reg(DataType::S16, ""), 65535), Value::Integer(-1));
        assert_eq!(c.raw_to_value(&reg(DataType::S32, ""), 4294967294), Value::Integer(-2));
        assert_eq!(c.value_to_raw(&reg(DataType::S16, ""), &Value::Integer(-1)).unwrap(), 65535);
        assert_eq!(c.value_to_raw(&reg(DataType::U16, ""), &Value::Number(7.9)).unwrap(), 7);
    }

    #[test]
    fn scaled_values() {
        let c = converter();
        let temp = reg(DataType::S16, "1/10°C");
        assert_eq!(c.raw_to_value(&temp, 215), Value::Number(21.5));
        assert_eq!(c.raw_to_value(&temp, 65531), Value::Number(-0.5));
        assert_eq!(c.value_to_raw(&temp, &Value::Number(-0.5)).unwrap(), 65531);
        let third = reg(DataType::U16, "1/3h");
        assert_eq!(c.raw_to_value(&third, 1), Value::Number(0.333));
        for n in [1u32, 10, 100, 1000] {
            let token = format!("1/{n}bar");
            let register = reg(DataType::S16, &token);
            for k in [-250i64, -1, 0, 3, 999] {
                let v = k as f64 / f64::from(n);
                let raw = c.value_to_raw(&register, &Value::Number(v)).unwrap();
                assert_eq!(c.raw_to_value(&register, raw), Value::Number(v), "{token} {v}");
            }
        }
    }

    #[test]
    fn unmatched_tokens_pass_through() {
        let c = converter();
        assert_eq!(c.raw_to_value(&reg(DataType::U16, "°C"), 42), Value::Integer(42));
        assert_eq!(c.value_to_raw(&reg(DataType::U16, "°C"), &Value::Number(42.7)).unwrap(), 42);
        assert!(matches!(
            c.value_to_raw(&reg(DataType::U16, "°C"), &Value::Label("warm".into())),
            Err(Error::NotNumeric(_, 100))
        ));
    }

    #[test]
    fn missing_tables_convert_as_integers() {
        let c = converter();
        let missing = reg(DataType::S16, "Missing_t");
        assert_eq!(c.raw_to_value(&missing, 65535), Value::Integer(-1));
        assert_eq!(c.value_to_raw(&missing, &Value::Integer(-1)).unwrap(), 65535);
        assert!(matches!(
            c.value_to_raw(&missing, &Value::Label("Unknown (3)".into())),
            Err(Error::NotNumeric(_, 100))
        ));
    }

    #[test]
    fn value_table_values() {
        let c = converter();
        let mode = reg(DataType::U16, "Mode_t");
        assert_eq!(c.raw_to_value(&mode, 2), Value::Label("Heizen".into()));
        assert_eq!(c.raw_to_value(&mode, 7), Value::Label("Unknown (7)".into()));
        for (_, label) in c.options(&mode) {
            let raw = c.value_to_raw(&mode, &Value::Label(label.to_string())).unwrap();
            assert_eq!(c.raw_to_value(&mode, raw), Value::Label(label.to_string()));
        }
        assert_eq!(c.value_to_raw(&mode, &Value::Label("Unknown (7)".into())).unwrap(), 7);
        assert_eq!(c.value_to_raw(&mode, &Value::Label("Kühlen".into())).unwrap(), 0);

        let offset = reg(DataType::S16, "Offset_t");
        assert_eq!(c.raw_to_value(&offset, 65535), Value::Label("Minus".into()));
        assert_eq!(c.value_to_raw(&offset, &Value::Label("Minus".into())).unwrap(), 65535);
        assert_eq!(c.display_value(&offset, 1), Some("Plus".into()));
        assert_eq!(c.display_value(&reg(DataType::U16, "1/10°C"), 1), None);
    }

    #[test]
    fn float_registers() {
        let c = converter();
        let register = reg(DataType::F32, "");
        let raw = c.value_to_raw(&register, &Value::Number(1.5)).unwrap();
        assert_eq!(raw, i64::from(1.5f32.to_bits()));
        assert_eq!(c.raw_to_value(&register, raw), Value::Number(1.5));
    }

    #[test]
    fn value_table_classification() {
        let c = converter();
        assert!(c.is_value_table("Mode_t"));
        assert!(!c.is_value_table(""));
        assert!(!c.is_value_table("1/10°C"));
        assert!(!c.is_value_table("kWh"));
        assert!(!c.is_value_table("Upm"));
        assert!(!c.is_value_table("Stufe"));
        // `t` is a unit (tonnes), which shadows the `_t` table-name heuristic.
        assert!(!c.is_value_table("Missing_t"));
        assert!(c.is_numeric(&reg(DataType::U16, "")));
        assert!(c.is_numeric(&reg(DataType::U16, "1/100bar")));
        assert!(c.is_numeric(&reg(DataType::U16, "rpm")));
        assert!(!c.is_numeric(&reg(DataType::U16, "Mode_t")));
        assert!(!c.is_numeric(&reg(DataType::U16, "Stufe")));
        // Ends with the `t` unit suffix.
        assert!(c.is_numeric(&reg(DataType::U16, "Betriebsart")));
    }

    #[test]
    fn boolean_tables() {
        let c = converter();
        assert!(c.is_boolean_value_table("OnOff_t"));
        assert!(!c.is_boolean_value_table("Mode_t"));
        assert!(!c.is_boolean_value_table("Level_t"));
        assert!(!c.is_boolean_value_table("Unknown_t"));
        assert_eq!(c.switch_codes("OnOff_t"), Some(SwitchCodes { on: 1, off: 0 }));
        assert_eq!(c.switch_codes("Level_t"), Some(SwitchCodes { on: 2, off: 1 }));
        assert_eq!(c.switch_codes("Mode_t"), None);
    }

    #[test]
    fn units_and_bounds() {
        let c = converter();
        assert_eq!(c.unit_of_measurement("1/10°C"), Some("°C"));
        assert_eq!(c.unit_of_measurement("1/10l"), Some("L"));
        assert_eq!(c.unit_of_measurement("°C"), None);
        assert_eq!(c.unit_of_measurement("1/10"), None);
        assert_eq!(c.unit_of_measurement("Mode_t"), None);
        assert_eq!(c.device_class("1/10°C"), Some(DeviceClass::Temperature));
        assert_eq!(c.device_class("1/100bar"), Some(DeviceClass::Pressure));
        assert_eq!(c.device_class("1/10%"), None);
        assert_eq!(unit_to_class("kW"), Some(DeviceClass::Power));
        assert_eq!(unit_to_class("Hz"), Some(DeviceClass::Frequency));
        assert_eq!(bounds_for_type(Some(DataType::S16)), (-32768.0, 32767.0));
        assert_eq!(bounds_for_type(Some(DataType::U16)), (0.0, 65535.0));
        assert_eq!(bounds_for_type(Some(DataType::S32)), (0.0, 4294967295.0));
        assert_eq!(bounds_for_type(None), (0.0, 1_000_000.0));
        assert_eq!(step_for("1/10°C"), 0.1);
        assert_eq!(step_for("°C"), 1.0);
        let mut declared = reg(DataType::S16, "1/2°C");
        declared.max = Some(80.0);
        assert_eq!(bounds(&declared), Bounds { min: -32768.0, max: 80.0, step: 0.5 });
    }

    #[test]
    fn presentation_kinds() {
        let c = converter();
        let rw = |token: &str| reg(DataType::U16, token).with_access("readwrite", "readwrite");
        assert_eq!(c.presentation(&rw("OnOff_t")), Presentation::Switch);
        assert_eq!(c.presentation(&rw("Mode_t")), Presentation::Select);
        assert_eq!(c.presentation(&rw("1/10°C")), Presentation::Number);
        assert_eq!(c.presentation(&rw("Stufe")), Presentation::Sensor);
        let read_only = reg(DataType::U16, "Mode_t").with_access("read", "readwrite");
        assert_eq!(c.presentation(&read_only), Presentation::Sensor);
    }

    #[test]
    fn input_values() {
        assert_eq!(Value::from_input("12"), Value::Integer(12));
        assert_eq!(Value::from_input("-1.5"), Value::Number(-1.5));
        assert_eq!(Value::from_input("Ein"), Value::Label("Ein".into()));
        assert_eq!(Value::Number(21.0).to_string(), "21");
        assert_eq!(parse_unknown_label("Unknown (12)"), Some(12));
        assert_eq!(parse_unknown_label("Unknown"), None);
    }
}
