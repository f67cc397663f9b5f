// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the audio callback thread when LOWLAT_THREAD_PRIORITY is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Priority settings for the callback thread, read from the environment when
/// a stream is built so the callback itself never touches env.
pub struct CallbackPriority {
    priority: ThreadPriority,
    realtime: bool,
    applied: bool,
}

impl CallbackPriority {
    /// LOWLAT_THREAD_PRIORITY (0-99) sets the priority. RT scheduling is on
    /// unless LOWLAT_DISABLE_RT_AUDIO is set.
    pub fn from_env() -> CallbackPriority {
        let value = std::env::var("LOWLAT_THREAD_PRIORITY")
            .ok()
            .and_then(|v| v.parse::<u8>().ok())
            .filter(|n| *n < 100)
            .unwrap_or(DEFAULT_CALLBACK_THREAD_PRIORITY);
        let priority = ThreadPriorityValue::try_from(value)
            .map(ThreadPriority::Crossplatform)
            .unwrap_or(ThreadPriority::Max);
        CallbackPriority {
            priority,
            realtime: !env_flag("LOWLAT_DISABLE_RT_AUDIO"),
            applied: false,
        }
    }

    /// Raises the calling thread's priority the first time it is called.
    #[inline]
    pub fn apply_once(&mut self) {
        if self.applied {
            return;
        }
        self.applied = true;
        let _ = set_current_thread_priority(self.priority);

        #[cfg(unix)]
        if self.realtime {
            use thread_priority::unix::{
                set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
                ThreadSchedulePolicy,
            };
            match set_thread_priority_and_policy(
                thread_native_id(),
                self.priority,
                ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
            ) {
                Ok(()) => info!("Enabled RT SCHED_FIFO for audio callback thread"),
                Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for audio callback thread"),
            }
        }
    }
}
