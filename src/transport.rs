//! Register transport abstraction
//!
//! The engine never frames bytes itself. It consumes a [`RegisterTransport`]
//! that can open a session and read `count` words starting at a protocol
//! address of a bank. Exactly one read is outstanding at a time: every method
//! takes `&mut self`, so a transport is owned by a single task.
//!
//! [`TransportSession`] scopes a session: it connects on open and closes the
//! transport when dropped, on success, on error and on unwind.
//!
//! [`MemoryTransport`] serves reads from an in-memory register image and can
//! inject faults; it backs the tests, the bench and the demo binary.

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tracing::debug;

use crate::bytes::{i32_to_regs, text_to_regs, u32_to_regs};
use crate::constants::REGISTER_WORD_ORDER;
use crate::error::TransportError;
use crate::plan::ScanWindow;
use crate::schema::{BankKind, DataType, RegisterSchema};

/// Request/response access to a device's register banks.
///
/// # Implementing
///
/// ```rust
/// use voltage_regmap::{BankKind, RegisterTransport, TransportError};
///
/// struct Fixed;
///
/// impl RegisterTransport for Fixed {
///     async fn connect(&mut self) -> Result<(), TransportError> {
///         Ok(())
///     }
///
///     async fn read_bank(&mut self, _bank: BankKind, _start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
///         Ok(vec![0; count as usize])
///     }
///
///     fn close(&mut self) {}
///
///     fn is_connected(&self) -> bool {
///         true
///     }
/// }
/// ```
pub trait RegisterTransport: Send {
    /// Open the session.
    fn connect(&mut self) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Read `count` words starting at 0-based protocol address `start`.
    fn read_bank(
        &mut self,
        bank: BankKind,
        start: u16,
        count: u16,
    ) -> impl std::future::Future<Output = Result<Vec<u16>, TransportError>> + Send;

    /// Close the session. Must be safe to call on a closed transport.
    fn close(&mut self);

    /// Check if a session is open.
    fn is_connected(&self) -> bool;
}

/// Scoped transport session, closed on drop.
pub struct TransportSession<'a, T: RegisterTransport> {
    transport: &'a mut T,
}

impl<'a, T: RegisterTransport> TransportSession<'a, T> {
    /// Connect and return the guard. A failed connect still closes the transport.
    pub async fn open(transport: &'a mut T) -> Result<Self, TransportError> {
        Self::open_within(transport, Duration::ZERO).await
    }

    /// Like [`open`](Self::open), failing with [`TransportError::Timeout`]
    /// if the connect takes longer than `limit`. A zero limit waits forever.
    pub async fn open_within(transport: &'a mut T, limit: Duration) -> Result<Self, TransportError> {
        let connected = if limit.is_zero() {
            transport.connect().await
        } else {
            tokio::time::timeout(limit, transport.connect())
                .await
                .unwrap_or_else(|_| Err(TransportError::timeout_after("connect", limit)))
        };
        if let Err(err) = connected {
            transport.close();
            return Err(err);
        }
        Ok(Self { transport })
    }
}

impl<T: RegisterTransport> Deref for TransportSession<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.transport
    }
}

impl<T: RegisterTransport> DerefMut for TransportSession<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.transport
    }
}

impl<T: RegisterTransport> Drop for TransportSession<'_, T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// In-memory register image with fault injection.
///
/// Setters take 1-based register numbers, the same numbering as
/// [`RegisterSchema::address`]. Unset registers read as 0.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::{BankKind, MemoryTransport, RegisterTransport};
///
/// # tokio_test::block_on(async {
/// let mut transport = MemoryTransport::new();
/// transport.write_register(BankKind::Input, 5001, 0x0d0f);
///
/// transport.connect().await.unwrap();
/// let words = transport.read_bank(BankKind::Input, 5000, 2).await.unwrap();
/// assert_eq!(words, vec![0x0d0f, 0]);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryTransport {
    banks: HashMap<BankKind, BTreeMap<u16, u16>>,
    connected: bool,
    refuse_connect: bool,
    failures: HashMap<(BankKind, u16), TransportError>,
    short_reads: HashMap<(BankKind, u16), u16>,
    latency: Option<Duration>,
    connect_latency: Option<Duration>,
    requests: Vec<ScanWindow>,
    connects: usize,
    closes: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one register.
    pub fn write_register(&mut self, bank: BankKind, register: u16, value: u16) {
        if let Some(address) = register.checked_sub(1) {
            self.banks.entry(bank).or_default().insert(address, value);
        }
    }

    /// Set consecutive registers starting at `register`.
    pub fn write_registers(&mut self, bank: BankKind, register: u16, values: &[u16]) {
        for (i, &value) in values.iter().enumerate() {
            if let Some(reg) = u16::try_from(i).ok().and_then(|i| register.checked_add(i)) {
                self.write_register(bank, reg, value);
            }
        }
    }

    /// Encode a raw integer at a numeric field's location.
    pub fn put(&mut self, schema: &RegisterSchema, raw: i64) {
        match schema.data_type {
            DataType::U16 | DataType::S16 => {
                self.write_register(schema.bank, schema.address, raw as u16)
            }
            DataType::U32 => {
                let regs = u32_to_regs(raw as u32, REGISTER_WORD_ORDER);
                self.write_registers(schema.bank, schema.address, &regs);
            }
            DataType::S32 => {
                let regs = i32_to_regs(raw as i32, REGISTER_WORD_ORDER);
                self.write_registers(schema.bank, schema.address, &regs);
            }
            DataType::Utf8 => self.put_text(schema, &raw.to_string()),
        }
    }

    /// Encode a string at a field's location, NUL padded to its length.
    pub fn put_text(&mut self, schema: &RegisterSchema, text: &str) {
        let regs = text_to_regs(text, usize::from(schema.length));
        self.write_registers(schema.bank, schema.address, &regs);
    }

    /// Make every read starting at protocol address `start` fail.
    pub fn fail_reads_at(&mut self, bank: BankKind, start: u16, error: TransportError) {
        self.failures.insert((bank, start), error);
    }

    /// Make every read starting at protocol address `start` return `count` words.
    pub fn short_read_at(&mut self, bank: BankKind, start: u16, count: u16) {
        self.short_reads.insert((bank, start), count);
    }

    /// Remove injected failures and short reads.
    pub fn clear_faults(&mut self) {
        self.failures.clear();
        self.short_reads.clear();
    }

    /// Refuse (or accept again) connection attempts.
    pub fn refuse_connections(&mut self, refuse: bool) {
        self.refuse_connect = refuse;
    }

    /// Delay every read.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay every connect.
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = Some(latency);
        self
    }

    /// Reads issued so far, in order.
    pub fn requests(&self) -> &[ScanWindow] {
        &self.requests
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    pub fn connect_count(&self) -> usize {
        self.connects
    }

    pub fn close_count(&self) -> usize {
        self.closes
    }
}

impl RegisterTransport for MemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connects += 1;
        if let Some(latency) = self.connect_latency {
            tokio::time::sleep(latency).await;
        }
        if self.refuse_connect {
            return Err(TransportError::connection("connection refused"));
        }
        self.connected = true;
        Ok(())
    }

    async fn read_bank(
        &mut self,
        bank: BankKind,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.requests.push(ScanWindow::new(bank, start, count));
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.failures.get(&(bank, start)) {
            return Err(err.clone());
        }

        let served = self
            .short_reads
            .get(&(bank, start))
            .copied()
            .unwrap_or(count);
        let image = self.banks.get(&bank);
        let words = (0..u32::from(served))
            .map(|i| {
                u16::try_from(u32::from(start) + i)
                    .ok()
                    .and_then(|address| image.and_then(|regs| regs.get(&address)))
                    .copied()
                    .unwrap_or(0)
            })
            .collect();
        debug!("Served {} {}+{} ({} words)", bank, start, count, served);
        Ok(words)
    }

    fn close(&mut self) {
        if self.connected {
            self.closes += 1;
        }
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_read_requires_connection() {
        let mut transport = MemoryTransport::new();
        let err = transport.read_bank(BankKind::Input, 0, 1).await;
        assert_eq!(err, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_register_image() {
        let mut transport = MemoryTransport::new();
        let power = RegisterSchema::new("power", BankKind::Input, 11, DataType::U32);
        let temp = RegisterSchema::new("temp", BankKind::Input, 13, DataType::S16);
        transport.put(&power, 0x0002_0001);
        transport.put(&temp, -5);
        transport.write_register(BankKind::Holding, 11, 42);

        assert_ok!(transport.connect().await);
        let words = assert_ok!(transport.read_bank(BankKind::Input, 10, 4).await);
        assert_eq!(words, vec![0x0001, 0x0002, 0xFFFB, 0]);

        let words = assert_ok!(transport.read_bank(BankKind::Holding, 10, 1).await);
        assert_eq!(words, vec![42]);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let mut transport = MemoryTransport::new();
        transport.fail_reads_at(BankKind::Input, 0, TransportError::Exception { code: 2 });
        transport.short_read_at(BankKind::Holding, 0, 3);
        assert_ok!(transport.connect().await);

        assert_err!(transport.read_bank(BankKind::Input, 0, 10).await);
        let words = assert_ok!(transport.read_bank(BankKind::Holding, 0, 10).await);
        assert_eq!(words.len(), 3);

        transport.clear_faults();
        assert_ok!(transport.read_bank(BankKind::Input, 0, 10).await);
    }

    #[tokio::test]
    async fn test_session_closes_on_drop() {
        let mut transport = MemoryTransport::new();
        {
            let mut session = assert_ok!(TransportSession::open(&mut transport).await);
            assert!(session.is_connected());
            assert_ok!(session.read_bank(BankKind::Input, 0, 1).await);
        }
        assert!(!transport.is_connected());
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_session_open_failure() {
        let mut transport = MemoryTransport::new();
        transport.refuse_connections(true);
        {
            let result = TransportSession::open(&mut transport).await;
            assert!(matches!(result, Err(TransportError::Connection { .. })));
        }
        assert!(!transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_open_times_out() {
        let mut transport = MemoryTransport::new().with_connect_latency(Duration::from_secs(60));
        let result = TransportSession::open_within(&mut transport, Duration::from_secs(2)).await;
        assert_eq!(result.err(), Some(TransportError::timeout("connect", 2000)));
        assert!(!transport.is_connected());

        let session = TransportSession::open_within(&mut transport, Duration::from_secs(90)).await;
        assert!(assert_ok!(session).is_connected());
    }

    #[test]
    fn test_text_image() {
        let mut transport = MemoryTransport::new();
        let serial = RegisterSchema::new("serial", BankKind::Input, 1, DataType::Utf8).with_length(2);
        transport.put_text(&serial, "AB");
        let image = &transport.banks[&BankKind::Input];
        assert_eq!(image.get(&0), Some(&0x4142));
        assert_eq!(image.get(&1), Some(&0));
    }
}
