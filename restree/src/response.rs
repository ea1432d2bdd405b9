//! Responses and the actions that consume them.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use tempfile::NamedTempFile;

use crate::categorizer::IntervalCategorizer;
use crate::config::TemplateConfig;
use crate::error::{Error, IoContext, Result};
use crate::render::{Model, Renderer, Value};
use crate::OutputFormat;

const BODY_LABEL: &str = "<response body>";

/// A response body read once from the wire and re-readable afterwards.
///
/// Up to the threshold it is kept in memory; beyond that it is written to a
/// temporary file that is removed when the provider is dropped.
#[derive(Debug)]
pub enum BodyProvider {
    Memory(Vec<u8>),
    File(NamedTempFile),
}

impl BodyProvider {
    /// # Errors
    ///
    /// Fails when reading the source or writing the spill file fails. A
    /// partially written spill file is removed.
    pub fn materialize<R: Read>(reader: R, threshold: usize) -> Result<Self> {
        Self::materialize_in(reader, threshold, &std::env::temp_dir())
    }

    /// As [`Self::materialize`], spilling into `dir`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::materialize`].
    pub fn materialize_in<R: Read>(mut reader: R, threshold: usize, dir: &Path) -> Result<Self> {
        let mut head = Vec::new();
        let limit = u64::try_from(threshold).unwrap_or(u64::MAX).saturating_add(1);
        reader
            .by_ref()
            .take(limit)
            .read_to_end(&mut head)
            .at(Path::new(BODY_LABEL))?;
        if head.len() <= threshold {
            return Ok(BodyProvider::Memory(head));
        }

        let mut spill = NamedTempFile::new_in(dir).at(dir)?;
        spill.write_all(&head).at(spill.path())?;
        io::copy(&mut reader, &mut spill).at(spill.path())?;
        spill.flush().at(spill.path())?;
        Ok(BodyProvider::File(spill))
    }

    /// A fresh reader positioned at the start of the body.
    ///
    /// # Errors
    ///
    /// Fails when the spill file cannot be reopened.
    pub fn open(&self) -> Result<Box<dyn Read + '_>> {
        Ok(match self {
            BodyProvider::Memory(bytes) => Box::new(Cursor::new(bytes.as_slice())),
            BodyProvider::File(spill) => Box::new(File::open(spill.path()).at(spill.path())?),
        })
    }

    /// Whole body as text, replacing invalid UTF-8.
    ///
    /// # Errors
    ///
    /// Fails when the body cannot be read.
    pub fn text(&self) -> Result<String> {
        let mut bytes = Vec::new();
        self.open()?
            .read_to_end(&mut bytes)
            .at(Path::new(BODY_LABEL))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Location of the spill file, if the body was spilled.
    #[must_use]
    pub fn spill_path(&self) -> Option<PathBuf> {
        match self {
            BodyProvider::Memory(_) => None,
            BodyProvider::File(spill) => Some(spill.path().to_path_buf()),
        }
    }
}

pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    live: Option<Box<dyn Read + Send>>,
    body: Option<BodyProvider>,
    failure: Option<String>,
    threshold: usize,
}

impl Response {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Box<dyn Read + Send>,
        threshold: usize,
    ) -> Self {
        Self {
            status,
            headers,
            live: Some(body),
            body: None,
            failure: None,
            threshold,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The body, read from the wire on first access.
    ///
    /// # Errors
    ///
    /// Fails when reading the wire or spilling fails. The wire can only be
    /// read once, so every later call fails with [`Error::BodyUnavailable`].
    pub fn body(&mut self) -> Result<&BodyProvider> {
        if let Some(reason) = &self.failure {
            return Err(Error::BodyUnavailable(reason.clone()));
        }
        let provider = match self.body.take() {
            Some(provider) => provider,
            None => {
                let live = self.live.take().unwrap_or_else(|| Box::new(io::empty()));
                match BodyProvider::materialize(live, self.threshold) {
                    Ok(provider) => provider,
                    Err(err) => {
                        self.failure = Some(match &err {
                            Error::Io { source, .. } => source.to_string(),
                            other => other.to_string(),
                        });
                        return Err(err);
                    }
                }
            }
        };
        Ok(self.body.insert(provider))
    }

    /// Body already read by [`Self::body`], if any.
    #[must_use]
    pub fn materialized_body(&self) -> Option<&BodyProvider> {
        self.body.as_ref()
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("failure", &self.failure)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

// =====================
// Response actions
// =====================

pub trait ResponseHandler {
    type Output;

    /// # Errors
    ///
    /// Implementation specific.
    fn handle(&self, response: &mut Response) -> Result<Self::Output>;
}

/// A handler run only for its side effects.
pub trait ResponseStep {
    /// # Errors
    ///
    /// Implementation specific.
    fn run(&self, response: &mut Response) -> Result<()>;
}

impl<H: ResponseHandler> ResponseStep for H {
    fn run(&self, response: &mut Response) -> Result<()> {
        self.handle(response).map(|_| ())
    }
}

/// Always yields the same value.
#[derive(Debug, Clone)]
pub struct Fixed<T>(pub T);

impl<T: Clone> ResponseHandler for Fixed<T> {
    type Output = T;

    fn handle(&self, _response: &mut Response) -> Result<T> {
        Ok(self.0.clone())
    }
}

/// True iff the status is 2xx.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsSuccess;

impl ResponseHandler for IsSuccess {
    type Output = bool;

    fn handle(&self, response: &mut Response) -> Result<bool> {
        Ok(response.status().is_success())
    }
}

type SharedHandler<T> = Arc<dyn ResponseHandler<Output = T>>;

/// Delegates by status code range, with a catch-all.
pub struct ByStatus<T> {
    arms: IntervalCategorizer<u16, SharedHandler<T>>,
}

impl<T> ByStatus<T> {
    pub fn new(default: impl ResponseHandler<Output = T> + 'static) -> Self {
        let default: SharedHandler<T> = Arc::new(default);
        Self {
            arms: IntervalCategorizer::with_default(default),
        }
    }

    /// Route statuses in `[lower, upper)` to `handler`; later calls win.
    #[must_use]
    pub fn on(mut self, lower: u16, upper: u16, handler: impl ResponseHandler<Output = T> + 'static) -> Self {
        let handler: SharedHandler<T> = Arc::new(handler);
        self.arms.add(lower, upper, handler);
        self
    }
}

impl<T> ResponseHandler for ByStatus<T> {
    type Output = T;

    fn handle(&self, response: &mut Response) -> Result<T> {
        let status = response.status().as_u16();
        let handler = self
            .arms
            .get(status)
            .cloned()
            .ok_or_else(|| Error::InvalidRequest(format!("no handler for status {status}")))?;
        handler.handle(response)
    }
}

/// Runs side steps around one handler and returns that handler's result.
pub struct Composite<'a, T> {
    before: Vec<Box<dyn ResponseStep + 'a>>,
    result: Box<dyn ResponseHandler<Output = T> + 'a>,
    after: Vec<Box<dyn ResponseStep + 'a>>,
}

impl<'a, T> Composite<'a, T> {
    pub fn new(result: impl ResponseHandler<Output = T> + 'a) -> Self {
        Self {
            before: Vec::new(),
            result: Box::new(result),
            after: Vec::new(),
        }
    }

    #[must_use]
    pub fn before(mut self, step: impl ResponseStep + 'a) -> Self {
        self.before.push(Box::new(step));
        self
    }

    #[must_use]
    pub fn after(mut self, step: impl ResponseStep + 'a) -> Self {
        self.after.push(Box::new(step));
        self
    }
}

impl<T> ResponseHandler for Composite<'_, T> {
    type Output = T;

    fn handle(&self, response: &mut Response) -> Result<T> {
        for step in &self.before {
            step.run(response)?;
        }
        let out = self.result.handle(response)?;
        for step in &self.after {
            step.run(response)?;
        }
        Ok(out)
    }
}

// =====================
// Output rendering
// =====================

/// The request line shown alongside a response.
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: String,
    pub uri: String,
}

/// Writes a response to `out` in the chosen format.
pub struct RenderOutput<W: Write> {
    format: OutputFormat,
    renderer: Arc<dyn Renderer>,
    template: TemplateConfig,
    params: BTreeMap<String, String>,
    variables: BTreeMap<String, String>,
    request: RequestLine,
    width: usize,
    out: RefCell<W>,
}

impl<W: Write> RenderOutput<W> {
    /// `params` are the template's defaults already overlaid with caller
    /// values; `variables` are the environment's.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        format: OutputFormat,
        renderer: Arc<dyn Renderer>,
        template: TemplateConfig,
        params: BTreeMap<String, String>,
        variables: BTreeMap<String, String>,
        request: RequestLine,
        width: usize,
        out: W,
    ) -> Self {
        Self {
            format,
            renderer,
            template,
            params,
            variables,
            request,
            width,
            out: RefCell::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        self.out
            .borrow_mut()
            .write_all(bytes)
            .at(Path::new("<output>"))
    }
}

impl<W: Write> ResponseHandler for RenderOutput<W> {
    type Output = ();

    fn handle(&self, response: &mut Response) -> Result<()> {
        if self.format == OutputFormat::Quiet {
            return Ok(());
        }
        response.body()?;
        let response: &Response = response;
        let Some(body) = response.materialized_body() else {
            return Ok(());
        };

        match self.format {
            OutputFormat::Quiet => Ok(()),
            OutputFormat::Raw => {
                let mut bytes = Vec::new();
                body.open()?
                    .read_to_end(&mut bytes)
                    .at(Path::new(BODY_LABEL))?;
                self.write(&bytes)
            }
            OutputFormat::Json => {
                let document = serde_json::json!({
                    "status": response.status().as_u16(),
                    "headers": header_lists(response.headers()),
                    "body": body.text()?,
                });
                let mut text = serde_json::to_string_pretty(&document).map_err(|source| {
                    Error::Encode {
                        what: "response".to_string(),
                        source,
                    }
                })?;
                text.push('\n');
                self.write(text.as_bytes())
            }
            OutputFormat::Template => {
                let model = OutputModel {
                    response,
                    body,
                    output: self,
                };
                let text = self.renderer.render(&self.template.template, &model)?;
                self.write(text.as_bytes())
            }
        }
    }
}

fn header_lists(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut lists: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        lists
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    lists
}

/// Variables visible to output templates.
struct OutputModel<'a, W: Write> {
    response: &'a Response,
    body: &'a BodyProvider,
    output: &'a RenderOutput<W>,
}

impl<W: Write> Model for OutputModel<'_, W> {
    fn lookup(&self, name: &str) -> Result<Option<Value>> {
        let status = self.response.status();
        let value = match name {
            "status" => Some(status.as_u16().to_string()),
            "reason" => Some(status.canonical_reason().unwrap_or_default().to_string()),
            "body" => Some(self.body.text()?),
            "method" => Some(self.output.request.method.clone()),
            "uri" => Some(self.output.request.uri.clone()),
            "width" => Some(self.output.width.to_string()),
            "headers" => Some(
                header_lists(self.response.headers())
                    .iter()
                    .flat_map(|(k, vs)| vs.iter().map(move |v| format!("{k}: {v}")))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            _ => {
                if let Some(header) = name.strip_prefix("header.") {
                    let values: Vec<String> = self
                        .response
                        .headers()
                        .get_all(header)
                        .iter()
                        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                        .collect();
                    return Ok((!values.is_empty()).then(|| Value::List(values)));
                }
                self.output
                    .params
                    .get(name)
                    .or_else(|| self.output.variables.get(name))
                    .cloned()
            }
        };
        Ok(value.map(Value::Text))
    }
}
