//! Controlled browser: tab session, page drivers, and the service process.
//!
//! The orchestrator talks to the browser through [`BrowserPort`]. In
//! production that is a [`BrowserSupervisor`] driving the `vocal-browser`
//! subprocess; [`LocalBrowser`] runs the same service in-process.

pub mod driver;
pub mod memory;
pub mod protocol;
pub mod service;
pub mod supervisor;
pub mod tabs;
pub mod webdriver;

pub use driver::{DriverError, PageDriver, TabHandle};
pub use memory::MemoryDriver;
pub use protocol::{BrowserRequest, BrowserResponse, ReplyBody, Status, TabContext};
pub use service::BrowserService;
pub use supervisor::{BrowserSupervisor, ServiceState, SupervisorError};
pub use tabs::{TabError, TabSessionStore, TabSettings};

use crate::error::{ErrorCode, VocalError};
use async_trait::async_trait;

/// Request/response access to the controlled browser.
#[async_trait]
pub trait BrowserPort: Send {
    /// Execute one request. Transport failures are errors; failures the
    /// service reports come back as error responses.
    async fn call(&mut self, request: BrowserRequest) -> crate::Result<BrowserResponse>;

    /// Close the browser. The next call starts it again.
    async fn close(&mut self) -> crate::Result<()>;

    /// Current tab titles and active index.
    async fn tab_context(&mut self) -> crate::Result<TabContext> {
        let resp = self.call(BrowserRequest::GetTabContext).await?;
        match resp.reply {
            ReplyBody::Tabs(ctx) if resp.is_success() => Ok(ctx),
            ReplyBody::Tabs(_) => Err(VocalError::Browser {
                code: resp.code.unwrap_or(ErrorCode::BrowserError),
                message: "tab context request failed".to_owned(),
            }),
            ReplyBody::Text(message) => Err(VocalError::Browser {
                code: resp.code.unwrap_or(ErrorCode::BrowserError),
                message,
            }),
        }
    }
}

#[async_trait]
impl BrowserPort for BrowserSupervisor {
    async fn call(&mut self, request: BrowserRequest) -> crate::Result<BrowserResponse> {
        Ok(self.request(request).await?)
    }

    async fn close(&mut self) -> crate::Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

type DriverFactory<D> = Box<dyn Fn() -> D + Send>;

/// In-process browser service over any [`PageDriver`].
///
/// The session is started lazily from `factory` and again after `close()`.
pub struct LocalBrowser<D: PageDriver> {
    factory: DriverFactory<D>,
    settings: TabSettings,
    service: Option<BrowserService<D>>,
}

impl<D: PageDriver> std::fmt::Debug for LocalBrowser<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBrowser")
            .field("running", &self.service.is_some())
            .finish()
    }
}

impl<D: PageDriver> LocalBrowser<D> {
    pub fn new(settings: TabSettings, factory: impl Fn() -> D + Send + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            settings,
            service: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.service.is_some()
    }

    async fn service(&mut self) -> crate::Result<&mut BrowserService<D>> {
        if self.service.is_none() {
            let store = TabSessionStore::start((self.factory)(), self.settings.clone())
                .await
                .map_err(|e| VocalError::ServiceUnavailable(e.to_string()))?;
            self.service = Some(BrowserService::new(store));
        }
        self.service
            .as_mut()
            .ok_or_else(|| VocalError::ServiceUnavailable("browser session missing".to_owned()))
    }
}

#[async_trait]
impl<D: PageDriver + 'static> BrowserPort for LocalBrowser<D> {
    async fn call(&mut self, request: BrowserRequest) -> crate::Result<BrowserResponse> {
        if request == BrowserRequest::Shutdown {
            self.close().await?;
            return Ok(BrowserResponse::success("Closing the browser."));
        }
        let service = self.service().await?;
        Ok(service.handle(request).await)
    }

    async fn close(&mut self) -> crate::Result<()> {
        if let Some(service) = self.service.take() {
            service
                .into_store()
                .shutdown()
                .await
                .map_err(|e| VocalError::ServiceUnavailable(e.to_string()))?;
        }
        Ok(())
    }
}
