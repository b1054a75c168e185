//! Browser service: the subprocess side of the local command protocol.
//!
//! Reads newline-delimited [`RequestLine`]s, executes them against one
//! [`TabSessionStore`], and writes one [`BrowserResponse`] per request.
//! A `ready` line is written before the first read.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output must go to stderr.

use super::driver::PageDriver;
use super::protocol::{BrowserRequest, BrowserResponse, MAX_LINE_BYTES, RequestLine};
use super::tabs::{TabError, TabReply, TabSessionStore};
use crate::error::{ErrorCode, VocalError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Executes protocol requests against a tab session.
#[derive(Debug)]
pub struct BrowserService<D: PageDriver> {
    store: TabSessionStore<D>,
}

fn from_tab_reply(reply: TabReply) -> BrowserResponse {
    if reply.partial {
        BrowserResponse::partial(reply.text)
    } else {
        BrowserResponse::success(reply.text)
    }
}

fn from_tab_error(err: TabError) -> BrowserResponse {
    let code = err.code();
    tracing::warn!(%code, error = %err, "browser request failed");
    BrowserResponse::error(code, err.to_string())
}

fn respond(result: Result<TabReply, TabError>) -> BrowserResponse {
    match result {
        Ok(reply) => from_tab_reply(reply),
        Err(e) => from_tab_error(e),
    }
}

impl<D: PageDriver> BrowserService<D> {
    pub fn new(store: TabSessionStore<D>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TabSessionStore<D> {
        &self.store
    }

    pub fn into_store(self) -> TabSessionStore<D> {
        self.store
    }

    /// Execute one request. Failures become error responses.
    pub async fn handle(&mut self, request: BrowserRequest) -> BrowserResponse {
        let store = &mut self.store;
        match request {
            BrowserRequest::Ping => BrowserResponse::success("pong"),
            BrowserRequest::Goto { target } => respond(store.goto(&target).await),
            BrowserRequest::Fill { selector, content } => {
                respond(store.fill(&selector, &content).await)
            }
            BrowserRequest::Press { selector, key } => respond(store.press(&selector, &key).await),
            BrowserRequest::Click { selector } => respond(store.click(&selector).await),
            BrowserRequest::Scroll { direction } => respond(store.scroll(direction).await),
            BrowserRequest::ClickFirstResult => respond(store.click_first_result().await),
            BrowserRequest::OpenTab => respond(store.open_tab().await),
            BrowserRequest::CloseTab => respond(store.close_tab().await),
            BrowserRequest::SwitchTab { index } => respond(store.switch_tab(index).await),
            BrowserRequest::NextTab => respond(store.next_tab().await),
            BrowserRequest::PrevTab => respond(store.prev_tab().await),
            BrowserRequest::SendEmail => respond(store.send_email().await),
            BrowserRequest::GetTabContext => match store.tab_context().await {
                Ok(ctx) => BrowserResponse::tabs(ctx),
                Err(e) => from_tab_error(e),
            },
            BrowserRequest::GetTitle => match store.get_title().await {
                Ok(title) => BrowserResponse::success(title),
                Err(e) => from_tab_error(e),
            },
            BrowserRequest::Shutdown => BrowserResponse::success("Closing the browser."),
        }
    }

    /// Serve requests from `reader` until EOF or a `shutdown` request, then
    /// close the browser session.
    pub async fn run<R, W>(mut self, mut reader: R, mut writer: W) -> crate::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_response(&mut writer, &BrowserResponse::ready()).await?;
        tracing::info!("browser service ready");

        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                tracing::info!("stdin closed (EOF); shutting down browser service");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.len() > MAX_LINE_BYTES {
                let response = BrowserResponse::error(
                    ErrorCode::ParseError,
                    format!("request exceeds {MAX_LINE_BYTES} bytes"),
                );
                write_response(&mut writer, &response).await?;
                continue;
            }

            let parsed = match RequestLine::parse(trimmed) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(error = %e, raw_line = %trimmed, "unparsable request");
                    let response = BrowserResponse::error(
                        ErrorCode::ParseError,
                        format!("failed to parse request: {e}"),
                    );
                    write_response(&mut writer, &response).await?;
                    continue;
                }
            };

            let id = parsed.id;
            let shutting_down = parsed.request == BrowserRequest::Shutdown;
            tracing::debug!(id, action = parsed.request.name(), "handling request");

            let response = self.handle(parsed.request).await.with_id(id);
            write_response(&mut writer, &response).await?;

            if shutting_down {
                tracing::info!("shutdown requested");
                break;
            }
        }

        self.store
            .shutdown()
            .await
            .map_err(|e| VocalError::ServiceUnavailable(e.to_string()))
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &BrowserResponse,
) -> crate::Result<()> {
    let line = response
        .to_line()
        .map_err(|e| VocalError::Config(format!("failed to serialize response: {e}")))?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Serve the protocol on this process's stdin/stdout.
pub async fn run_stdio<D: PageDriver>(store: TabSessionStore<D>) -> crate::Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    BrowserService::new(store)
        .run(reader, tokio::io::stdout())
        .await
}
