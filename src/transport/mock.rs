//! Scripted transport used by lifecycle and lookup tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    AuthState, BusinessProfile, ConnectionEvent, ContactCheck, EventReceiver, StatusEntry,
    Transport, TransportError, TransportHandle,
};

/// Scripted outcome of a status lookup for one JID.
#[derive(Debug, Clone)]
pub(crate) enum LookupScript {
    HasBio(&'static str),
    NoBio,
    Unregistered,
    RateLimited,
    Fail(&'static str),
}

/// Handle whose lookup responses follow per-JID scripts.
pub(crate) struct MockHandle {
    events: mpsc::Sender<ConnectionEvent>,
    jid: Mutex<Option<String>>,
    scripts: Mutex<HashMap<String, LookupScript>>,
    default_script: Mutex<LookupScript>,
    fetch_delay: Mutex<Duration>,
    pub(crate) fetch_calls: AtomicUsize,
    pub(crate) logout_calls: AtomicUsize,
    concurrent: AtomicUsize,
    pub(crate) max_concurrent: AtomicUsize,
}

impl MockHandle {
    pub(crate) fn new() -> (Arc<Self>, EventReceiver) {
        let (tx, rx) = mpsc::channel(32);
        let handle = Arc::new(Self {
            events: tx,
            jid: Mutex::new(None),
            scripts: Mutex::new(HashMap::new()),
            default_script: Mutex::new(LookupScript::NoBio),
            fetch_delay: Mutex::new(Duration::ZERO),
            fetch_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        });
        (handle, rx)
    }

    pub(crate) async fn emit(&self, event: ConnectionEvent) {
        self.events.send(event).await.ok();
    }

    pub(crate) fn set_user_jid(&self, jid: &str) {
        *self.jid.lock().unwrap() = Some(jid.to_owned());
    }

    pub(crate) fn script(&self, jid: &str, script: LookupScript) {
        self.scripts.lock().unwrap().insert(jid.to_owned(), script);
    }

    pub(crate) fn script_default(&self, script: LookupScript) {
        *self.default_script.lock().unwrap() = script;
    }

    pub(crate) fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    fn script_for(&self, jid: &str) -> LookupScript {
        self.scripts
            .lock()
            .unwrap()
            .get(jid)
            .cloned()
            .unwrap_or_else(|| self.default_script.lock().unwrap().clone())
    }
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn request_pairing_code(
        &self,
        _phone: &str,
        custom_code: Option<&str>,
    ) -> Result<String, TransportError> {
        Ok(custom_code.unwrap_or("ABCD1234").to_owned())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_status(&self, jid: &str) -> Result<Vec<StatusEntry>, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        match self.script_for(jid) {
            LookupScript::HasBio(text) => Ok(vec![StatusEntry {
                status: Some(text.to_owned()),
                set_at: Some(chrono::Utc::now()),
            }]),
            LookupScript::NoBio | LookupScript::Unregistered => Ok(Vec::new()),
            LookupScript::RateLimited => {
                Err(TransportError::Lookup("rate-overlimit".to_owned()))
            }
            LookupScript::Fail(msg) => Err(TransportError::Lookup(msg.to_owned())),
        }
    }

    async fn on_whatsapp(&self, jid: &str) -> Result<Vec<ContactCheck>, TransportError> {
        let exists = !matches!(self.script_for(jid), LookupScript::Unregistered);
        Ok(vec![ContactCheck {
            jid: jid.to_owned(),
            exists,
        }])
    }

    async fn business_profile(
        &self,
        _jid: &str,
    ) -> Result<Option<BusinessProfile>, TransportError> {
        Ok(None)
    }

    fn user_jid(&self) -> Option<String> {
        self.jid.lock().unwrap().clone()
    }
}

/// Transport that records connect attempts and exposes created handles.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub(crate) connect_calls: AtomicUsize,
    fail_connects: AtomicUsize,
    handles: Mutex<Vec<Arc<MockHandle>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` connect attempts fail.
    pub(crate) fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Returns the handle created by the `index`-th successful connect.
    pub(crate) fn handle(&self, index: usize) -> Arc<MockHandle> {
        Arc::clone(&self.handles.lock().unwrap()[index])
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        _auth: &AuthState,
    ) -> Result<(Arc<dyn TransportHandle>, EventReceiver), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Open("scripted failure".to_owned()));
        }

        let (handle, rx) = MockHandle::new();
        self.handles.lock().unwrap().push(Arc::clone(&handle));
        Ok((handle, rx))
    }
}
