mod common;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use kwb_heating_tools::convert::Value;
use kwb_heating_tools::location::CatalogLocator;
use kwb_heating_tools::registers::{AccessLevel, EquipmentCategory, EquipmentConfig};
use kwb_heating_tools::session::{DeviceSession, Error, SessionSettings, Transport};
use kwb_heating_tools::version::RawVersion;

/// An in-memory controller.
#[derive(Default)]
struct Controller {
    memory: Mutex<HashMap<u16, u16>>,
    reads: AtomicUsize,
    writes: Mutex<Vec<(u16, u16)>>,
    offline: bool,
}

impl Controller {
    fn with(words: &[(u16, u16)]) -> Self {
        Self { memory: Mutex::new(words.iter().copied().collect()), ..Default::default() }
    }
}

impl Transport for Controller {
    type Error = std::io::Error;

    async fn read_registers(&self, address: u16, count: u16) -> Result<Vec<u16>, Self::Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no response"));
        }
        let memory = self.memory.lock().unwrap();
        Ok((address..address + count).map_while(|a| memory.get(&a).copied()).collect())
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<(), Self::Error> {
        self.memory.lock().unwrap().insert(address, value);
        self.writes.lock().unwrap().push((address, value));
        Ok(())
    }
}

async fn open(
    controller: Controller,
    locator: CatalogLocator,
    version: impl Into<RawVersion>,
) -> Result<DeviceSession<Controller>, Error> {
    DeviceSession::open(controller, locator, settings(), Some(version.into())).await
}

fn catalog_tree(base: &Path) {
    common::catalog_location(&base.join("versions/v25.7.1/de"), "Kesseltemperatur");
    common::catalog_location(&base.join("versions/v25.7.1/en"), "Boiler temperature");
}

fn settings() -> SessionSettings {
    SessionSettings {
        level: AccessLevel::User,
        device_type: "KWB CF 2".into(),
        language: Some("de".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn detects_firmware_with_a_single_read() {
    let dir = tempfile::tempdir().unwrap();
    catalog_tree(dir.path());
    let locator = CatalogLocator::load(dir.path()).await;
    let session = DeviceSession::open(Controller::with(&[(8192, 25)]), locator, settings(), None)
        .await
        .unwrap();
    assert_eq!(session.transport().reads.load(Ordering::SeqCst), 1);
    let location = session.location().await;
    assert_eq!(location.version, "25.7.1");
    assert_eq!(location.path, dir.path().join("versions/v25.7.1/de"));
}

#[tokio::test]
async fn detection_failures_are_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    catalog_tree(dir.path());
    let locator = CatalogLocator::load(dir.path()).await;

    let controller = Controller { offline: true, ..Default::default() };
    let session = DeviceSession::open(controller, locator.clone(), settings(), None).await;
    assert!(matches!(session, Err(Error::Transport(_))));

    let session = DeviceSession::open(Controller::default(), locator, settings(), None).await;
    assert!(matches!(session, Err(Error::EmptyResponse(8192))));
}

#[tokio::test]
async fn broken_catalog_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let locator = CatalogLocator::load(dir.path()).await;
    let session = open(Controller::default(), locator, 25u16).await;
    assert!(matches!(session, Err(Error::Catalog(_))));
}

#[tokio::test]
async fn reads_and_writes_domain_values() {
    let dir = tempfile::tempdir().unwrap();
    catalog_tree(dir.path());
    let locator = CatalogLocator::load(dir.path()).await;
    let controller = Controller::with(&[(8200, 65531), (8210, 1), (8211, 2), (8220, 0)]);
    let session = open(controller, locator, RawVersion::Integer(25)).await.unwrap();
    assert_eq!(session.transport().reads.load(Ordering::SeqCst), 0);

    assert_eq!(session.read_value(8200).await.unwrap(), Value::Number(-0.5));
    assert_eq!(session.read_value(8210).await.unwrap(), Value::Integer(65538));
    assert_eq!(session.read_value(8220).await.unwrap(), Value::Label("Aus".into()));
    assert!(matches!(session.read_value(8300).await, Err(Error::EmptyResponse(8300))));
    assert!(matches!(session.read_value(8230).await, Err(Error::UnknownRegister(8230))));

    let raw = session.write_value(8220, &Value::Label("Ein".into())).await.unwrap();
    assert_eq!(raw, 1);
    assert_eq!(*session.transport().writes.lock().unwrap(), [(8220, 1)]);
    assert_eq!(session.read_value(8220).await.unwrap(), Value::Label("Ein".into()));

    assert!(matches!(
        session.write_value(8200, &Value::Number(20.0)).await,
        Err(Error::NotWritable(8200))
    ));
    assert!(matches!(
        session.write_value(9999, &Value::Integer(1)).await,
        Err(Error::UnknownRegister(9999))
    ));
}

#[tokio::test]
async fn reloads_swap_the_register_set() {
    let dir = tempfile::tempdir().unwrap();
    catalog_tree(dir.path());
    let locator = CatalogLocator::load(dir.path()).await;
    let session = open(Controller::default(), locator, "25.7.1").await.unwrap();
    let before = session.registers().await;
    assert!(before.get(9000).is_none());

    let equipment = EquipmentConfig::default().with(EquipmentCategory::HeatingCircuits, 1);
    let after = session.set_equipment(equipment).await.unwrap();
    assert_eq!(after.get(9000).unwrap().friendly_name, "Heizkreis 1.1: Vorlauf");
    assert!(after.get(9010).is_none());
    assert_eq!(after.len(), before.len() + 2);
    assert_eq!(session.settings().await.equipment, equipment);

    let english = session.set_language(Some("en".into())).await.unwrap();
    assert_eq!(english.get(8200).unwrap().friendly_name, "Boiler temperature");
    assert_eq!(session.location().await.language, "en");
    assert!(english.get(9000).is_some());

    let expert = session.set_access_level(AccessLevel::Expert).await.unwrap();
    assert!(expert.get(8230).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_reloads_keep_every_change() {
    let dir = tempfile::tempdir().unwrap();
    catalog_tree(dir.path());
    let locator = CatalogLocator::load(dir.path()).await;
    let session = open(Controller::default(), locator, 25u16).await.unwrap();

    let equipment = EquipmentConfig::default().with(EquipmentCategory::HeatingCircuits, 1);
    for _ in 0..10 {
        let (a, b) = tokio::join!(
            session.set_equipment(equipment),
            session.set_access_level(AccessLevel::Expert)
        );
        a.unwrap();
        b.unwrap();
        let settings = session.settings().await;
        assert_eq!(settings.equipment, equipment);
        assert_eq!(settings.level, AccessLevel::Expert);
        let registers = session.registers().await;
        assert!(registers.get(9000).is_some());
        assert!(registers.get(8230).is_some());

        let (a, b) = tokio::join!(
            session.set_equipment(EquipmentConfig::default()),
            session.set_access_level(AccessLevel::User)
        );
        a.unwrap();
        b.unwrap();
        let registers = session.registers().await;
        assert!(registers.get(9000).is_none());
        assert!(registers.get(8230).is_none());
    }
}

fn versioned_catalog_tree(base: &Path) {
    common::catalog_location(&base.join("versions/v22.7.1/de"), "Kessel");
    common::catalog_location(&base.join("versions/v25.7.1/de"), "Kesseltemperatur");
}

#[tokio::test]
async fn version_changes_switch_the_catalog() {
    let dir = tempfile::tempdir().unwrap();
    versioned_catalog_tree(dir.path());
    let locator = CatalogLocator::load(dir.path()).await;
    let session = open(Controller::default(), locator, 22u16).await.unwrap();
    assert_eq!(session.location().await.version, "22.7.1");
    assert_eq!(session.registers().await.get(8200).unwrap().friendly_name, "Kessel");

    let registers = session.set_version("V25.7.1".into()).await.unwrap();
    let location = session.location().await;
    assert_eq!(location.version, "25.7.1");
    assert_eq!(location.path, dir.path().join("versions/v25.7.1/de"));
    assert_eq!(registers.get(8200).unwrap().friendly_name, "Kesseltemperatur");
    assert_eq!(session.transport().reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn redetection_reloads_only_on_a_new_version() {
    let dir = tempfile::tempdir().unwrap();
    versioned_catalog_tree(dir.path());
    let locator = CatalogLocator::load(dir.path()).await;
    let controller = Controller::with(&[(8192, 25)]);
    let session = open(controller, locator, 22u16).await.unwrap();
    assert_eq!(session.location().await.version, "22.7.1");

    let location = session.redetect_version().await.unwrap();
    assert_eq!(location.version, "25.7.1");
    assert_eq!(session.transport().reads.load(Ordering::SeqCst), 1);
    let registers = session.registers().await;
    assert_eq!(registers.get(8200).unwrap().friendly_name, "Kesseltemperatur");

    let location = session.redetect_version().await.unwrap();
    assert_eq!(location.version, "25.7.1");
    assert_eq!(session.transport().reads.load(Ordering::SeqCst), 2);
    assert!(std::sync::Arc::ptr_eq(&registers, &session.registers().await));
}
