//! Device identification
//!
//! Reads the catalog's identification plan with a bootstrap scope, looks the
//! device-type code up in the catalog and, when the model declares a
//! [`ComponentProbe`](crate::catalog::ComponentProbe), reads the attached
//! sub-component count.

use std::slice;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::{CatalogEntry, DeviceCatalog, DeviceModel};
use crate::decoder::{Decoder, DeviceScope};
use crate::error::{ScanError, ScanResult};
use crate::executor::ScanExecutor;
use crate::transport::RegisterTransport;
use crate::value::{FieldMap, Value};

/// Resolves the attached device against a [`DeviceCatalog`].
#[derive(Debug, Clone)]
pub struct DeviceResolver {
    catalog: Arc<DeviceCatalog>,
    executor: ScanExecutor,
}

impl DeviceResolver {
    pub fn new(catalog: Arc<DeviceCatalog>, executor: ScanExecutor) -> Self {
        Self { catalog, executor }
    }

    #[inline]
    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Identify the device behind an open transport.
    ///
    /// Fails with [`ScanError::MissingIdentity`] when the device-type code is
    /// absent from the bootstrap decode and with
    /// [`ScanError::UnsupportedDevice`] when the catalog has no entry for it.
    pub async fn identify<T: RegisterTransport>(&self, transport: &mut T) -> ScanResult<DeviceModel> {
        let identification = self.catalog.identification();
        let fields = self
            .executor
            .run_scoped(
                &identification.plan,
                transport,
                &identification.schemas,
                &DeviceScope::bootstrap(),
            )
            .await?;

        let device_code = fields
            .get(&identification.device_code_key)
            .and_then(Value::as_i64)
            .and_then(|code| u16::try_from(code).ok())
            .ok_or_else(|| ScanError::MissingIdentity {
                key: identification.device_code_key.clone(),
            })?;
        let entry = self
            .catalog
            .lookup(device_code)
            .ok_or(ScanError::UnsupportedDevice(device_code))?;

        let component_count = self.component_count(entry, transport).await?;
        let mut device = DeviceModel::from_entry(entry, component_count);
        device.serial = text_field(&fields, identification.serial_key.as_deref());
        device.firmware = text_field(&fields, identification.firmware_key.as_deref());
        device.nominal_output = identification
            .nominal_output_key
            .as_deref()
            .and_then(|key| fields.get(key))
            .and_then(Value::as_f64);

        info!(
            "Identified {} (code {:#06x}, {} components)",
            device.name, device.device_code, device.component_count
        );
        Ok(device)
    }

    async fn component_count<T: RegisterTransport>(
        &self,
        entry: &CatalogEntry,
        transport: &mut T,
    ) -> ScanResult<u32> {
        let Some(probe) = &entry.component_probe else {
            return Ok(entry.component_count);
        };

        self.executor.pace().await;
        let words = self.executor.read_window(transport, &probe.window).await?;
        let scope = DeviceScope::device(entry.device_code, 0);
        let fields = Decoder::decode_scoped(&words, &probe.window, slice::from_ref(&probe.schema), &scope);

        match fields.get(&probe.schema.key).and_then(Value::as_i64) {
            Some(count) => {
                let clamped = count.clamp(0, i64::from(entry.max_components)) as u32;
                debug!("Component probe reported {}, using {}", count, clamped);
                Ok(clamped)
            }
            None => {
                warn!(
                    "Component probe '{}' gave no count, using {}",
                    probe.schema.key, entry.component_count
                );
                Ok(entry.component_count)
            }
        }
    }
}

fn text_field(fields: &FieldMap, key: Option<&str>) -> Option<String> {
    let text = fields.get(key?)?.as_str()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ComponentProbe, IdentificationPlan, SchemaSet, Topology};
    use crate::error::TransportError;
    use crate::plan::{ScanPlan, ScanWindow};
    use crate::schema::{BankKind, DataType, RegisterSchema};
    use crate::transport::MemoryTransport;
    use tokio_test::assert_ok;

    const HYBRID: u16 = 0x0d0f;
    const STRING: u16 = 0x0d06;

    fn code_field() -> RegisterSchema {
        RegisterSchema::new("device_type_code", BankKind::Input, 5000, DataType::U16)
    }

    fn serial_field() -> RegisterSchema {
        RegisterSchema::new("serial_number", BankKind::Input, 4990, DataType::Utf8).with_length(10)
    }

    fn rating_field() -> RegisterSchema {
        RegisterSchema::new("nominal_output", BankKind::Input, 5001, DataType::U16).with_scale(0.1)
    }

    fn mppt_field() -> RegisterSchema {
        RegisterSchema::new("mppt_count", BankKind::Holding, 13000, DataType::U16)
    }

    fn catalog() -> Arc<DeviceCatalog> {
        let identification = IdentificationPlan::new(
            ScanPlan::from(vec![ScanWindow::input(4989, 12)]),
            vec![serial_field(), code_field(), rating_field()],
            "device_type_code",
        )
        .with_serial_key("serial_number")
        .with_nominal_output_key("nominal_output");

        let set = Arc::new(SchemaSet::new(vec![], ScanPlan::new()));
        Arc::new(
            DeviceCatalog::new(identification)
                .with_entry(
                    CatalogEntry::new(HYBRID, "SH5.0RT", Topology::Hybrid, Arc::clone(&set))
                        .with_component_probe(
                            ComponentProbe::new(ScanWindow::holding(12999, 1), mppt_field()),
                            4,
                        ),
                )
                .with_entry(CatalogEntry::new(STRING, "SG5.0RS", Topology::StringOnly, set).with_components(2)),
        )
    }

    async fn device(code: u16) -> MemoryTransport {
        let mut transport = MemoryTransport::new();
        transport.put(&code_field(), i64::from(code));
        transport.put(&rating_field(), 50);
        transport.put_text(&serial_field(), "A2241234567");
        assert_ok!(transport.connect().await);
        transport
    }

    #[tokio::test]
    async fn test_identify_with_static_components() {
        let mut transport = device(STRING).await;
        let resolver = DeviceResolver::new(catalog(), ScanExecutor::new());

        let model = assert_ok!(resolver.identify(&mut transport).await);
        assert_eq!(model.device_code, STRING);
        assert_eq!(model.name, "SG5.0RS");
        assert_eq!(model.topology, Topology::StringOnly);
        assert_eq!(model.component_count, 2);
        assert_eq!(model.nominal_output, Some(5.0));
        assert_eq!(model.serial.as_deref(), Some("A2241234567"));
        assert_eq!(model.firmware, None);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_identify_probes_and_clamps_components() {
        let mut transport = device(HYBRID).await;
        transport.put(&mppt_field(), 9);
        let resolver = DeviceResolver::new(catalog(), ScanExecutor::new());

        let model = assert_ok!(resolver.identify(&mut transport).await);
        assert_eq!(model.component_count, 4);
        assert_eq!(transport.requests()[1], ScanWindow::holding(12999, 1));

        transport.put(&mppt_field(), 3);
        let model = assert_ok!(resolver.identify(&mut transport).await);
        assert_eq!(model.component_count, 3);
    }

    #[tokio::test]
    async fn test_identify_is_idempotent() {
        let mut transport = device(HYBRID).await;
        transport.put(&mppt_field(), 2);
        let resolver = DeviceResolver::new(catalog(), ScanExecutor::new());

        let first = assert_ok!(resolver.identify(&mut transport).await);
        let second = assert_ok!(resolver.identify(&mut transport).await);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unsupported_device() {
        let mut transport = device(0x0e01).await;
        let resolver = DeviceResolver::new(catalog(), ScanExecutor::new());

        let err = resolver.identify(&mut transport).await.unwrap_err();
        assert_eq!(err, ScanError::UnsupportedDevice(0x0e01));
        assert_eq!(err.to_string(), "Unsupported device type code 0x0e01");
    }

    #[tokio::test]
    async fn test_missing_identity() {
        let identification = IdentificationPlan::new(
            ScanPlan::from(vec![ScanWindow::input(4989, 12)]),
            vec![serial_field()],
            "device_type_code",
        );
        let resolver = DeviceResolver::new(
            Arc::new(DeviceCatalog::new(identification)),
            ScanExecutor::new(),
        );
        let mut transport = device(HYBRID).await;

        let err = resolver.identify(&mut transport).await.unwrap_err();
        assert_eq!(
            err,
            ScanError::MissingIdentity {
                key: "device_type_code".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let mut transport = device(HYBRID).await;
        transport.fail_reads_at(BankKind::Input, 4989, TransportError::connection("reset by peer"));
        let resolver = DeviceResolver::new(catalog(), ScanExecutor::new());

        let err = resolver.identify(&mut transport).await.unwrap_err();
        assert!(err.is_transport());
    }
}
