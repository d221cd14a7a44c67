//! The readiness-driven event loop.
//!
//! One epoll instance watches every registration. The wait blocks with no
//! timeout until at least one device is readable; each ready device is then
//! drained to completion before the loop goes back to sleep. Single thread,
//! no shutdown path besides a fatal error or an external signal.

use std::os::fd::BorrowedFd;
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::device::{DeviceRole, Registration, MAX_DEVICES};
use crate::error::DaemonError;
use crate::injector::VirtualKeyboard;
use crate::remapper::PedalRemapper;

pub struct EventLoop {
    epoll: Epoll,
    registrations: Vec<Registration>,
}

impl EventLoop {
    /// Register every device with the readiness facility. The epoll payload
    /// is the registration's index, which stays valid because registrations
    /// are never removed.
    pub fn new(registrations: Vec<Registration>) -> Result<Self, DaemonError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(DaemonError::Multiplex)?;

        for (index, registration) in registrations.iter().enumerate() {
            let fd = unsafe { BorrowedFd::borrow_raw(registration.device.as_raw_fd()) };
            epoll
                .add(fd, EpollEvent::new(EpollFlags::EPOLLIN, index as u64))
                .map_err(DaemonError::Multiplex)?;
            tracing::debug!("registered '{}' with the event loop", registration.name);
        }

        Ok(Self {
            epoll,
            registrations,
        })
    }

    /// Run until a fatal error; never returns `Ok`.
    ///
    /// A device that stops cooperating takes the whole daemon down: a
    /// remapper that silently loses one of its inputs is worse than one
    /// that exits loudly.
    pub fn run(
        &mut self,
        remapper: &mut PedalRemapper,
        output: &mut VirtualKeyboard,
    ) -> Result<(), DaemonError> {
        let mut ready = [EpollEvent::empty(); MAX_DEVICES];

        loop {
            let nready = match self.epoll.wait(&mut ready, EpollTimeout::NONE) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(DaemonError::Multiplex(e)),
            };

            for ready_event in &ready[..nready] {
                let index = ready_event.data() as usize;
                let registration = &mut self.registrations[index];
                let Registration {
                    device,
                    reader,
                    role,
                    name,
                } = registration;

                let drained = match role {
                    DeviceRole::FootSwitch => reader.drain(device, |event| {
                        remapper.handle_switch_event(&event, output)
                    }),
                    DeviceRole::Keyboard => reader.drain(device, |event| {
                        remapper.handle_keyboard_event(&event);
                        Ok(())
                    }),
                };

                if let Err(e) = drained {
                    tracing::error!("device '{}' failed: {}", name, e);
                    return Err(e);
                }
            }
        }
    }
}
