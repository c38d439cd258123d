//! Listener thread startup: attach, open the backend, report, then loop.

use crate::backend::{Driver, OpenRequest, Waker};
use crate::config::{EventsConfig, ListenerConfig};
use crate::error::{os_code, ListenerError, ERR_INIT_FAILED};
use crate::handle::PortHandle;
use crate::init::InitSignal;
use crate::looper::{Looper, LooperControls};
use crate::role::{AtomicRoleSet, Role, RoleSet};
use crate::sink::{panic_message, ListenerSink, SinkAttachment};
use crate::worker::Worker;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use tracing::{error, warn};

pub(super) struct SpawnParams {
    pub(super) handle: PortHandle,
    pub(super) driver: Arc<dyn Driver>,
    pub(super) sink: Arc<dyn ListenerSink>,
    pub(super) serves: RoleSet,
    pub(super) active: Arc<AtomicRoleSet>,
    pub(super) controls: Arc<LooperControls>,
    pub(super) listener: ListenerConfig,
    pub(super) events: EventsConfig,
}

fn thread_name(serves: RoleSet, handle: PortHandle) -> String {
    let label = if serves == RoleSet::ALL {
        "comm"
    } else if serves.contains(Role::Data) {
        "data"
    } else {
        "event"
    };
    format!("serial-{}-{}", label, handle)
}

/// Spawn a listener thread and block until it reports ready or failed.
pub(super) fn start(params: SpawnParams) -> Result<Worker, ListenerError> {
    let handle = params.handle;
    let name = thread_name(params.serves, handle);
    let exit = Arc::new(AtomicBool::new(false));
    let init: Arc<InitSignal<Arc<dyn Waker>>> = Arc::new(InitSignal::new());

    let thread = {
        let exit = Arc::clone(&exit);
        let init = Arc::clone(&init);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(params, exit, init))
            .map_err(ListenerError::Spawn)?
    };

    match init.wait() {
        Ok(waker) => Ok(Worker::new(name, exit, waker, thread)),
        Err(code) => {
            if thread.join().is_err() {
                warn!(%handle, "listener thread panicked during setup");
            }
            Err(ListenerError::InitFailed { handle, code })
        }
    }
}

fn run(params: SpawnParams, exit: Arc<AtomicBool>, init: Arc<InitSignal<Arc<dyn Waker>>>) {
    let handle = params.handle;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| serve(params, exit, &init)));
    if let Err(payload) = outcome {
        error!(%handle, panic = %panic_message(payload.as_ref()), "listener thread panicked");
        init.complete(Err(ERR_INIT_FAILED));
    }
}

fn serve(params: SpawnParams, exit: Arc<AtomicBool>, init: &InitSignal<Arc<dyn Waker>>) {
    let SpawnParams {
        handle,
        driver,
        sink,
        serves,
        active,
        controls,
        listener,
        events,
    } = params;

    let _attachment = match SinkAttachment::attach(&*sink) {
        Ok(guard) => guard,
        Err(e) => {
            warn!(%handle, error = %e, "sink attach failed");
            init.complete(Err(ERR_INIT_FAILED));
            return;
        }
    };

    let request = OpenRequest {
        handle,
        serves,
        active: active.load(),
        events: events.clone(),
    };
    let opened = match driver.open(&request) {
        Ok(opened) => opened,
        Err(e) => {
            warn!(%handle, roles = %serves, error = %e, "backend setup failed");
            init.complete(Err(os_code(&e)));
            return;
        }
    };

    let delivery = events.delivery.resolve(opened.delivery);
    init.complete(Ok(Arc::clone(&opened.waker)));

    Looper::new(
        handle,
        opened.backend,
        Arc::clone(&sink),
        exit,
        serves,
        active,
        controls,
        delivery,
        &listener,
    )
    .run();
}
