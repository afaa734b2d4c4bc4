use embedded_time::{Clock, Instant, duration::Milliseconds, rate::Fraction};

/// Microsecond clock over [`std::time::Instant`], counting from construction.
#[derive(Clone, Copy, Debug)]
pub struct StdClock {
    start: std::time::Instant,
}

impl Default for StdClock {
    fn default() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for StdClock {
    type T = u64;

    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
        let elapsed = self.start.elapsed();
        let micros = u64::try_from(elapsed.as_micros())
            .map_err(|_| embedded_time::clock::Error::Unspecified)?;

        Ok(Instant::new(micros))
    }
}

pub(crate) fn now<C: Clock>(clock: &C) -> crate::Result<Instant<C>> {
    clock.try_now().map_err(|_| crate::Error::Clock)
}

/// `instant + ms`; overflow yields `instant` unchanged.
pub(crate) fn after<C: Clock<T = u64>>(instant: Instant<C>, ms: u64) -> Instant<C> {
    instant.checked_add(Milliseconds(ms)).unwrap_or(instant)
}


#[cfg(test)]
mod tests {
    use super::{testing::ManualClock, *};

    #[test]
    fn std_clock_moves_forward() {
        let clock = StdClock::default();
        let first = clock.try_now().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(clock.try_now().unwrap() > first);
    }

    #[test]
    fn after_adds_milliseconds() {
        let clock = ManualClock::default();
        let start = clock.try_now().unwrap();
        let deadline = after(start, 1_500);

        clock.advance_ms(1_499);
        assert!(clock.try_now().unwrap() < deadline);

        clock.advance_ms(1);
        assert!(clock.try_now().unwrap() >= deadline);
    }
}
