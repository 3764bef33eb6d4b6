//! Output capture.
//!
//! The [`Tracer`] swaps the guest's stdout/stderr objects for in-memory
//! sinks built by the runtime itself, so everything a script prints (and
//! every diagnostic the runtime reports) can be read back by the host.
//!
//! Truncate and read always act on whatever object is *currently installed*
//! in the slot, not on the sink the tracer created: a script that replaces
//! its own stdout is read back faithfully.  Callers own the discipline of
//! truncating before and reading after each run; the session does this for
//! every `run_*` call.

use tracing::debug;

use crate::error::{HostError, HostResult};
use crate::runtime::{GuestObject, HostValue, Runtime, Stream};

struct Slot<O> {
    sink: O,
    saved: Option<O>,
}

/// Capture state: the installed sinks and the objects they replaced.
pub struct Tracer<O> {
    stdout: Option<Slot<O>>,
    stderr: Option<Slot<O>>,
}

impl<O: GuestObject> Default for Tracer<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: GuestObject> Tracer<O> {
    pub fn new() -> Self {
        Self { stdout: None, stderr: None }
    }

    pub fn is_active(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }

    /// Install fresh sinks in both slots, remembering the originals.
    pub fn start<R>(&mut self, rt: &R) -> HostResult<()>
    where
        R: Runtime<Object = O>,
    {
        if self.is_active() {
            return Err(HostError::CaptureInit("capture already started".into()));
        }
        for stream in Stream::ALL {
            if let Err(e) = self.install(rt, stream) {
                self.stop(rt);
                return Err(e);
            }
        }
        debug!(runtime = R::NAME, "output capture started");
        Ok(())
    }

    fn install<R>(&mut self, rt: &R, stream: Stream) -> HostResult<()>
    where
        R: Runtime<Object = O>,
    {
        let sink = rt
            .new_sink()
            .map_err(|e| HostError::CaptureInit(format!("{stream} sink: {e}")))?;
        let saved = rt.stream(stream);
        rt.install_stream(stream, &sink)
            .map_err(|e| HostError::CaptureInit(format!("install {stream}: {e}")))?;
        *self.slot_mut(stream) = Some(Slot { sink, saved });
        Ok(())
    }

    /// Put each stream's own original object back and drop the sinks.
    pub fn stop<R>(&mut self, rt: &R)
    where
        R: Runtime<Object = O>,
    {
        for stream in Stream::ALL {
            let Some(slot) = self.slot_mut(stream).take() else { continue };
            if let Some(saved) = &slot.saved {
                if let Err(e) = rt.install_stream(stream, saved) {
                    debug!(%stream, error = %e, "could not restore original stream");
                }
            }
            drop(slot.sink);
        }
        debug!(runtime = R::NAME, "output capture stopped");
    }

    /// Empty the object installed in `stream`.  Missing objects are ignored.
    pub fn truncate<R>(&self, rt: &R, stream: Stream)
    where
        R: Runtime<Object = O>,
    {
        let Some(obj) = rt.stream(stream) else { return };
        // Rewind first; an unpositioned truncate would leave later writes
        // at the old offset.
        let _ = obj.call_method("seek", &[HostValue::Int(0)]);
        let _ = obj.call_method("truncate", &[HostValue::Int(0)]);
    }

    /// Copy out the accumulated text of the object installed in `stream`.
    ///
    /// `None` when there is no object or it cannot report its contents.
    /// The object's contents are left as they are.
    pub fn buffer<R>(&self, rt: &R, stream: Stream) -> Option<String>
    where
        R: Runtime<Object = O>,
    {
        let obj = rt.stream(stream)?;
        let value = obj.call_method("getvalue", &[]).ok()??;
        value.as_text()
    }

    /// The sink this tracer installed for `stream`.
    pub fn sink(&self, stream: Stream) -> Option<&O> {
        self.slot(stream).map(|s| &s.sink)
    }

    /// The object that was installed in `stream` before capture started.
    pub fn saved(&self, stream: Stream) -> Option<&O> {
        self.slot(stream).and_then(|s| s.saved.as_ref())
    }

    fn slot(&self, stream: Stream) -> Option<&Slot<O>> {
        match stream {
            Stream::Stdout => self.stdout.as_ref(),
            Stream::Stderr => self.stderr.as_ref(),
        }
    }

    fn slot_mut(&mut self, stream: Stream) -> &mut Option<Slot<O>> {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
