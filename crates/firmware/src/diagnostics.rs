//! Outbound SysEx messages for the host tool: replies, parameter echoes and telemetry.
//!
//! Messages are produced synchronously from inside the engine's callbacks, so they are queued here and written to USB
//! by [`diagnostics_task`].

use crate::{Disconnected, UsbDriver};
use core::fmt;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::Timer;
use embassy_usb::class::midi::Sender;
use tinyvec::ArrayVec;
use yoctocore_lib::midi::{FRAME_CAPACITY, SysExFrame, sysex_text, sysex_usb_packets};

/// A framed SysEx message.
pub type Message = ArrayVec<[u8; FRAME_CAPACITY]>;

const QUEUE_DEPTH: usize = 8;

/// Messages waiting to be written to USB.
static OUTBOX: Channel<CriticalSectionRawMutex, Message, QUEUE_DEPTH> = Channel::new();

/// Queues a text message. Dropped if the queue is full, e.g., because no host is listening.
pub fn send_text(args: fmt::Arguments) {
    queue(sysex_text(args));
}

/// Queues a complete frame.
pub fn send_frame(frame: SysExFrame<FRAME_CAPACITY>) {
    queue(frame.finish());
}

/// Queues a message which has already been framed.
pub fn queue(message: Message) {
    if OUTBOX.try_send(message).is_err() {
        trace!("Diagnostic queue full; dropping message");
    }
}

/// Waits until every queued message has been handed to USB, plus a short grace period for the transfer itself.
///
/// Gives up after 100 ms, since nothing drains the queue while no host is connected.
pub async fn flush() {
    for _ in 0..100 {
        if OUTBOX.is_empty() {
            break;
        }
        Timer::after_millis(1).await;
    }
    Timer::after_millis(10).await;
}

/// Task responsible for writing queued messages to the host.
#[embassy_executor::task]
pub async fn diagnostics_task(mut sender: Sender<'static, UsbDriver>) -> ! {
    loop {
        sender.wait_connection().await;
        debug!("Diagnostics connected");
        let _ = write_messages(&mut sender).await;
        debug!("Diagnostics disconnected");
    }
}

async fn write_messages(sender: &mut Sender<'static, UsbDriver>) -> Result<(), Disconnected> {
    loop {
        let message = OUTBOX.receive().await;
        for packet in sysex_usb_packets(&message) {
            sender.write_packet(&packet).await?;
        }
    }
}
