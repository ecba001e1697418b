use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A coordination flag shared by every stage of a crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// No feeder worker is alive any more
    FeederExited,
    /// No parser worker is alive any more
    ParserExited,
    /// The download quota has been reached
    ReachMaxNum,
}

impl Signal {
    /// Every known signal, in declaration order
    pub const ALL: [Signal; 3] = [Self::FeederExited, Self::ParserExited, Self::ReachMaxNum];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeederExited => "feeder_exited",
            Self::ParserExited => "parser_exited",
            Self::ReachMaxNum => "reach_max_num",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feeder_exited" => Ok(Self::FeederExited),
            "parser_exited" => Ok(Self::ParserExited),
            "reach_max_num" => Ok(Self::ReachMaxNum),
            _ => Err(()),
        }
    }
}

/// Registry of coordination flags shared by all pools of a crawler
///
/// Every flag is an independent atomic boolean. Reads and writes are atomic
/// per flag; nothing orders writes to different flags relative to each
/// other, and nothing needs to.
#[derive(Debug, Default)]
pub struct Signals {
    feeder_exited: AtomicBool,
    parser_exited: AtomicBool,
    reach_max_num: AtomicBool,
}

impl Signals {
    /// Creates a registry with every flag cleared
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry behind an `Arc`, ready to hand to worker pools
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn flag(&self, signal: Signal) -> &AtomicBool {
        match signal {
            Signal::FeederExited => &self.feeder_exited,
            Signal::ParserExited => &self.parser_exited,
            Signal::ReachMaxNum => &self.reach_max_num,
        }
    }

    pub fn get(&self, signal: Signal) -> bool {
        self.flag(signal).load(Ordering::Acquire)
    }

    pub fn set(&self, signal: Signal, value: bool) {
        self.flag(signal).store(value, Ordering::Release);
    }

    /// Looks a flag up by name; unknown names read as `false`
    pub fn get_named(&self, name: &str) -> bool {
        name.parse::<Signal>()
            .map(|signal| self.get(signal))
            .unwrap_or(false)
    }

    /// Sets a flag by name, returning whether the name was known
    pub fn set_named(&self, name: &str, value: bool) -> bool {
        match name.parse::<Signal>() {
            Ok(signal) => {
                self.set(signal, value);
                true
            }
            Err(()) => {
                tracing::debug!("Ignoring unknown signal '{}'", name);
                false
            }
        }
    }

    /// Clears every flag
    pub fn reset(&self) {
        for signal in Signal::ALL {
            self.set(signal, false);
        }
    }

    /// Returns the current value of every flag
    pub fn snapshot(&self) -> Vec<(Signal, bool)> {
        Signal::ALL
            .iter()
            .map(|&signal| (signal, self.get(signal)))
            .collect()
    }

    /// True once the download quota has been reached
    pub fn quota_reached(&self) -> bool {
        self.get(Signal::ReachMaxNum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_new_registry_is_cleared() {
        let signals = Signals::new();
        for (_, value) in signals.snapshot() {
            assert!(!value);
        }
    }

    #[test]
    fn test_set_and_get() {
        let signals = Signals::new();
        signals.set(Signal::FeederExited, true);
        assert!(signals.get(Signal::FeederExited));
        assert!(!signals.get(Signal::ParserExited));
        assert!(!signals.quota_reached());
    }

    #[test]
    fn test_reset_clears_all_flags() {
        let signals = Signals::new();
        for signal in Signal::ALL {
            signals.set(signal, true);
        }
        signals.reset();
        assert!(signals.snapshot().iter().all(|(_, value)| !value));
    }

    #[test]
    fn test_named_access() {
        let signals = Signals::new();
        assert!(signals.set_named("reach_max_num", true));
        assert!(signals.get_named("reach_max_num"));
        assert!(signals.quota_reached());
    }

    #[test]
    fn test_unknown_name_reads_false() {
        let signals = Signals::new();
        assert!(!signals.get_named("no_such_signal"));
        assert!(!signals.set_named("no_such_signal", true));
    }

    #[test]
    fn test_signal_name_roundtrip() {
        for signal in Signal::ALL {
            assert_eq!(signal.as_str().parse::<Signal>(), Ok(signal));
        }
    }

    #[test]
    fn test_concurrent_writers() {
        let signals = Signals::shared();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let signals = Arc::clone(&signals);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        signals.set(Signal::ParserExited, i % 2 == 0);
                        let _ = signals.get(Signal::ParserExited);
                    }
                    signals.set(Signal::ReachMaxNum, true);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(signals.quota_reached());
    }
}
