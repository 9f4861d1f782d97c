//! # Scan Executor
//!
//! Runs a [`ScanPlan`] against an open transport: one read per window, in
//! plan order, decoded window by window and merged into one [`FieldMap`].
//!
//! A cycle is all-or-nothing. The first transport error, timeout or short
//! response aborts the plan and no partial map is returned.

use std::time::Duration;

use tracing::debug;

use crate::catalog::DeviceModel;
use crate::constants::DEFAULT_TIMEOUT_MS;
use crate::decoder::{Decoder, DeviceScope};
use crate::device_limits::DeviceLimits;
use crate::error::{ScanError, ScanResult, TransportError};
use crate::plan::{ScanPlan, ScanWindow};
use crate::schema::RegisterSchema;
use crate::transport::{RegisterTransport, TransportSession};
use crate::value::FieldMap;

/// Executes scan plans with per-read timeout and pacing.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanExecutor {
    limits: DeviceLimits,
    read_timeout: Duration,
}

impl Default for ScanExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanExecutor {
    /// Default limits and a 5 s read timeout.
    pub fn new() -> Self {
        Self {
            limits: DeviceLimits::new(),
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Bound every read and every session connect. Zero disables the bound.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[inline]
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    #[inline]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Run every window of `plan` and decode it for an identified device.
    pub async fn run<T: RegisterTransport>(
        &self,
        plan: &ScanPlan,
        transport: &mut T,
        schemas: &[RegisterSchema],
        device: &DeviceModel,
    ) -> ScanResult<FieldMap> {
        self.run_scoped(plan, transport, schemas, &DeviceScope::from(device))
            .await
    }

    /// Run `plan` under an explicit scope.
    ///
    /// Windows later in the plan overwrite earlier keys on collision.
    pub async fn run_scoped<T: RegisterTransport>(
        &self,
        plan: &ScanPlan,
        transport: &mut T,
        schemas: &[RegisterSchema],
        scope: &DeviceScope,
    ) -> ScanResult<FieldMap> {
        let mut fields = FieldMap::new();

        for (i, window) in plan.windows().iter().enumerate() {
            if i > 0 {
                self.pace().await;
            }
            let words = self.read_window(transport, window).await?;
            let decoded = Decoder::decode_scoped(&words, window, schemas, scope);
            debug!("Window {} decoded {} fields", window, decoded.len());
            fields.extend(decoded);
        }

        Ok(fields)
    }

    /// Open a session, bounding the connect by the read timeout.
    pub async fn open_session<'a, T: RegisterTransport>(
        &self,
        transport: &'a mut T,
    ) -> ScanResult<TransportSession<'a, T>> {
        Ok(TransportSession::open_within(transport, self.read_timeout).await?)
    }

    /// Wait the configured inter-request delay, if any.
    pub async fn pace(&self) {
        let delay_ms = self.limits.inter_request_delay_ms;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// Issue the single read for one window and check its length.
    pub async fn read_window<T: RegisterTransport>(
        &self,
        transport: &mut T,
        window: &ScanWindow,
    ) -> ScanResult<Vec<u16>> {
        let read = transport.read_bank(window.bank, window.start, window.count);
        let words = if self.read_timeout.is_zero() {
            read.await?
        } else {
            tokio::time::timeout(self.read_timeout, read)
                .await
                .map_err(|_| {
                    TransportError::timeout_after(format!("read {}", window), self.read_timeout)
                })??
        };

        if words.len() != usize::from(window.count) {
            return Err(ScanError::SizeMismatch {
                bank: window.bank,
                start: window.start,
                expected: window.count,
                actual: words.len(),
            });
        }
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BankKind, DataType};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_test::assert_ok;

    /// Scripted transport: replays queued responses and records every read
    struct MockTransport {
        requests: Mutex<Vec<ScanWindow>>,
        responses: Mutex<VecDeque<Result<Vec<u16>, TransportError>>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
            }
        }

        fn add_response(&self, response: Result<Vec<u16>, TransportError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn get_requests(&self) -> Vec<ScanWindow> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl RegisterTransport for MockTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn read_bank(
            &mut self,
            bank: BankKind,
            start: u16,
            count: u16,
        ) -> impl std::future::Future<Output = Result<Vec<u16>, TransportError>> + Send {
            self.requests
                .lock()
                .unwrap()
                .push(ScanWindow::new(bank, start, count));
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::connection("No response prepared in mock")));
            async move { response }
        }

        fn close(&mut self) {}

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn schemas() -> Vec<RegisterSchema> {
        vec![
            RegisterSchema::new("daily_yield", BankKind::Input, 5003, DataType::U16).with_scale(0.1),
            RegisterSchema::new("total_yield", BankKind::Input, 5004, DataType::U32),
            RegisterSchema::new("battery_soc", BankKind::Input, 13023, DataType::U16).with_scale(0.1),
        ]
    }

    fn plan() -> ScanPlan {
        ScanPlan::from(vec![ScanWindow::input(5002, 4), ScanWindow::input(13022, 1)])
    }

    #[tokio::test]
    async fn test_one_read_per_window_merged() {
        let mut mock = MockTransport::new();
        mock.add_response(Ok(vec![123, 0x86A0, 0x0001, 0]));
        mock.add_response(Ok(vec![875]));

        let fields = assert_ok!(
            ScanExecutor::new()
                .run_scoped(&plan(), &mut mock, &schemas(), &DeviceScope::device(1, 0))
                .await
        );

        assert_eq!(fields.len(), 3);
        assert_eq!(fields["daily_yield"].as_f64(), Some(12.3));
        assert_eq!(fields["total_yield"].as_i64(), Some(100_000));
        assert_eq!(fields["battery_soc"].as_f64(), Some(87.5));
        assert_eq!(mock.get_requests(), plan().windows().to_vec());
    }

    #[tokio::test]
    async fn test_short_response_is_size_mismatch() {
        let mut mock = MockTransport::new();
        mock.add_response(Ok(vec![1, 2, 3]));

        let err = ScanExecutor::new()
            .run_scoped(&plan(), &mut mock, &schemas(), &DeviceScope::bootstrap())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ScanError::SizeMismatch {
                bank: BankKind::Input,
                start: 5002,
                expected: 4,
                actual: 3
            }
        );
        // the second window is never requested
        assert_eq!(mock.get_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_aborts_plan() {
        let mut mock = MockTransport::new();
        mock.add_response(Ok(vec![0; 4]));
        mock.add_response(Err(TransportError::Exception { code: 2 }));

        let err = ScanExecutor::new()
            .run_scoped(&plan(), &mut mock, &schemas(), &DeviceScope::bootstrap())
            .await
            .unwrap_err();

        assert_eq!(err, ScanError::Transport(TransportError::Exception { code: 2 }));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_empty_plan_reads_nothing() {
        let mut mock = MockTransport::new();
        let fields = assert_ok!(
            ScanExecutor::new()
                .run_scoped(&ScanPlan::new(), &mut mock, &schemas(), &DeviceScope::bootstrap())
                .await
        );
        assert!(fields.is_empty());
        assert!(mock.get_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_read_times_out() {
        let mut transport = crate::transport::MemoryTransport::new()
            .with_latency(Duration::from_secs(10));
        assert_ok!(transport.connect().await);

        let executor = ScanExecutor::new().with_read_timeout(Duration::from_millis(500));
        let err = executor
            .run_scoped(&plan(), &mut transport, &schemas(), &DeviceScope::bootstrap())
            .await
            .unwrap_err();

        match err {
            ScanError::Transport(e) => {
                assert!(e.is_timeout());
                assert_eq!(e, TransportError::timeout("read input 5002+4", 500));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_connect_times_out() {
        let mut transport = crate::transport::MemoryTransport::new()
            .with_connect_latency(Duration::from_secs(3600));

        let executor = ScanExecutor::new().with_read_timeout(Duration::from_millis(750));
        let result = executor.open_session(&mut transport).await;

        assert_eq!(
            result.err(),
            Some(ScanError::Transport(TransportError::timeout("connect", 750)))
        );
        assert!(!transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_request_delay() {
        let mut mock = MockTransport::new();
        mock.add_response(Ok(vec![0; 4]));
        mock.add_response(Ok(vec![0]));

        let executor = ScanExecutor::new()
            .with_limits(DeviceLimits::new().with_inter_request_delay_ms(250));
        let started = tokio::time::Instant::now();
        assert_ok!(
            executor
                .run_scoped(&plan(), &mut mock, &schemas(), &DeviceScope::bootstrap())
                .await
        );
        // one gap between two windows
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
