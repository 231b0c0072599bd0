// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The boot console multiplexer.
//!
//! Sinks live in one arena and carry a list tag: *dormant* sinks are
//! available for binding (or have failed), *enabled* sinks receive
//! broadcast output. A sink binds when a firmware console descriptor
//! matches its hardware flavor; a sink whose transmitter times out is
//! demoted to dormant for the remainder of the boot.

pub mod uart;

use acpi_spec::AddressSpace;
use acpi_spec::Gas;
use parking_lot::Mutex;
use uart::Strategy;
use uart::UartIo;

/// Whether a sink is bound into the broadcast set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum List {
    Dormant,
    Enabled,
}

struct Sink {
    strategy: Strategy,
    list: List,
    /// The bound register block, for duplicate-binding refusal.
    regs: Option<(AddressSpace, u64)>,
    io: Option<Box<dyn UartIo + Send>>,
}

/// Maps a firmware register descriptor to a device register file.
///
/// The kernel maps MMIO registers into the master table (reserving
/// them from DMA) or passes port numbers through; tests hand out
/// fakes.
pub trait UartBackend {
    fn open(&mut self, gas: &Gas) -> Option<Box<dyn UartIo + Send>>;
}

/// The console: a fixed set of sinks behind one lock.
pub struct Console<B> {
    inner: Mutex<Inner<B>>,
}

struct Inner<B> {
    sinks: Vec<Sink>,
    backend: B,
    /// UART input clock in Hz for divisor programming.
    clock: u32,
    /// `nouart`: refuse all UART binding.
    nouart: bool,
}

impl<B: UartBackend> Console<B> {
    pub fn new(backend: B, clock: u32, nouart: bool) -> Console<B> {
        // The static sink set: two NS16550s (a platform often has a
        // COM port and a PCI debug port) and a PL011.
        let sinks = [Strategy::Ns16550, Strategy::Ns16550, Strategy::Pl011]
            .into_iter()
            .map(|strategy| Sink {
                strategy,
                list: List::Dormant,
                regs: None,
                io: None,
            })
            .collect();
        Console {
            inner: Mutex::new(Inner {
                sinks,
                backend,
                clock,
                nouart,
            }),
        }
    }

    /// Offers a firmware console descriptor to the dormant sinks.
    ///
    /// The first dormant sink whose flavor matches the (type,
    /// subtype) pair and whose register setup succeeds becomes
    /// enabled. Binding the same register block twice is refused.
    pub fn bind(&self, port_type: u16, port_subtype: u16, regs: &Gas) {
        let mut inner = self.inner.lock();
        if inner.nouart || !regs.is_present() || regs.addr.get() == 0 || regs.bits < 8 {
            return;
        }
        let identity = (regs.address_space(), regs.addr.get());
        if inner.sinks.iter().any(|s| s.regs == Some(identity)) {
            return;
        }

        let clock = inner.clock;
        let Inner { sinks, backend, .. } = &mut *inner;
        for sink in sinks.iter_mut() {
            if sink.list != List::Dormant || sink.regs.is_some() {
                continue;
            }
            if !sink.strategy.matches(port_type, port_subtype) {
                continue;
            }
            let Some(mut io) = backend.open(regs) else {
                continue;
            };
            if !sink.strategy.init(io.as_mut(), clock) {
                continue;
            }
            tracing::info!(
                port_type,
                port_subtype,
                addr = regs.addr.get(),
                "console sink enabled"
            );
            sink.regs = Some(identity);
            sink.io = Some(io);
            sink.list = List::Enabled;
            return;
        }
    }

    /// Broadcasts one byte to every enabled sink. A sink that cannot
    /// accept the byte within its timeout moves to the dormant list;
    /// the others continue unaffected.
    pub fn putc(&self, byte: u8) {
        let mut inner = self.inner.lock();
        for sink in inner.sinks.iter_mut() {
            if sink.list != List::Enabled {
                continue;
            }
            let io = sink.io.as_mut().expect("enabled sinks are bound");
            if !sink.strategy.putc(io.as_mut(), byte) {
                tracing::warn!("console sink timed out; demoted");
                sink.list = List::Dormant;
            }
        }
    }

    /// Writes a string, expanding LF to CRLF for serial terminals.
    pub fn write(&self, s: &str) {
        for b in s.bytes() {
            if b == b'\n' {
                self.putc(b'\r');
            }
            self.putc(b);
        }
    }

    /// Drains every enabled sink; a sink that cannot drain is
    /// demoted.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        for sink in inner.sinks.iter_mut() {
            if sink.list != List::Enabled {
                continue;
            }
            let io = sink.io.as_mut().expect("enabled sinks are bound");
            if !sink.strategy.drain(io.as_mut()) {
                sink.list = List::Dormant;
            }
        }
    }

    /// Number of sinks currently broadcasting.
    pub fn enabled(&self) -> usize {
        self.inner
            .lock()
            .sinks
            .iter()
            .filter(|s| s.list == List::Enabled)
            .count()
    }
}

/// A formatting front end over the console.
pub struct ConsoleWriter<'a, B>(pub &'a Console<B>);

impl<B: UartBackend> core::fmt::Write for ConsoleWriter<'_, B> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write(s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uart::testing::FakeUart;

    struct FakeBackend {
        uarts: Vec<FakeUart>,
    }

    impl UartBackend for FakeBackend {
        fn open(&mut self, _gas: &Gas) -> Option<Box<dyn UartIo + Send>> {
            Some(Box::new(self.uarts.remove(0)))
        }
    }

    fn pio(addr: u64) -> Gas {
        Gas {
            asid: AddressSpace::PIO.0,
            bits: 8,
            offs: 0,
            accs: 1,
            addr: addr.into(),
        }
    }

    fn serial_console(uarts: Vec<FakeUart>) -> Console<FakeBackend> {
        Console::new(FakeBackend { uarts }, 1_843_200, false)
    }

    #[test]
    fn bind_and_broadcast() {
        let console = serial_console(vec![FakeUart::working(), FakeUart::working()]);
        console.bind(0x8000, 0x0000, &pio(0x3f8));
        assert_eq!(console.enabled(), 1);

        console.write("ok\n");
        // CRLF expansion happened.
        // (The sink's transcript is owned by the console now; we only
        // observe behavior through enabled().)
        assert_eq!(console.enabled(), 1);
    }

    #[test]
    fn duplicate_register_binding_refused() {
        let console = serial_console(vec![FakeUart::working(), FakeUart::working()]);
        console.bind(0x8000, 0x0000, &pio(0x3f8));
        console.bind(0x8000, 0x0000, &pio(0x3f8));
        assert_eq!(console.enabled(), 1);

        // A different register block binds the second sink.
        console.bind(0x8000, 0x0001, &pio(0x2f8));
        assert_eq!(console.enabled(), 2);
    }

    #[test]
    fn nouart_refuses() {
        let console = Console::new(
            FakeBackend {
                uarts: vec![FakeUart::working()],
            },
            1_843_200,
            true,
        );
        console.bind(0x8000, 0x0000, &pio(0x3f8));
        assert_eq!(console.enabled(), 0);
    }

    /// The five-byte boot banner must either transmit fully or demote
    /// the sink; an unrelated enabled sink keeps transmitting.
    #[test]
    fn timeout_demotes_only_the_stuck_sink() {
        let console = serial_console(vec![FakeUart::working(), FakeUart::stuck()]);
        console.bind(0x8000, 0x0000, &pio(0x3f8));
        console.bind(0x8000, 0x0001, &pio(0x2f8));
        assert_eq!(console.enabled(), 2);

        for b in *b"BOOT\x0a" {
            console.putc(b);
        }
        // The stuck sink fell off; the healthy one survived.
        assert_eq!(console.enabled(), 1);
    }

    #[test]
    fn subtype_matching() {
        // A PL011 descriptor must not bind an NS16550 sink.
        let console = serial_console(vec![FakeUart::working()]);
        console.bind(0x8000, 0x0003, &pio(0x900_0000));
        // Only the third sink is a PL011; FakeBackend hands out in
        // order, so it bound the PL011 slot.
        assert_eq!(console.enabled(), 1);
    }
}
