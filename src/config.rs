use once_cell::sync::Lazy;

static CPU: Lazy<MaxActive> = Lazy::new(|| {
    let cores = num_cpus::get();
    MaxActive::new(cores, cores - 1)
});

/// Sum type of absolute value and scaling value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Count {
    Auto,
    Absolute(usize),
    Scale(f64),
}

impl Count {
    pub fn to_absolute(&self) -> usize {
        match *self {
            Self::Auto => num_cpus::get(),
            Self::Absolute(val) => {
                assert!(val > 0, "absolute value must be positive");
                val
            }
            Self::Scale(scale) => {
                assert!(
                    scale.is_finite() && scale > 0.0,
                    "scaling value must be positive finite"
                );
                (num_cpus::get() as f64 * scale).ceil() as usize
            }
        }
    }
}

impl From<usize> for Count {
    fn from(val: usize) -> Self {
        Count::Absolute(val)
    }
}

impl From<f64> for Count {
    fn from(scale: f64) -> Self {
        Count::Scale(scale)
    }
}

impl From<Option<usize>> for Count {
    fn from(val: Option<usize>) -> Self {
        match val {
            Some(val) => Count::Absolute(val),
            None => Count::Auto,
        }
    }
}

/// Admission thresholds for in-flight tasks.
///
/// Once more than `ceiling` tasks are active, the collector drains completed
/// tasks until no more than `reduce_to` remain. The gap between the two values
/// keeps draining from running on every single admission at the boundary.
///
/// The `config` parameters accepting `impl Into<MaxActive>` take the following values.
///
/// - `None`: the [IO](MaxActive::IO) preset.
/// - `10` or non-zero integers: ceiling 10, draining down to 90% of it.
/// - `2.5` or positive floating points: ceiling of 2.5 times the system processors.
/// - `(10, 5)`: ceiling 10, draining down to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaxActive {
    ceiling: usize,
    reduce_to: usize,
}

impl MaxActive {
    /// Thresholds suited to IO-bound work.
    pub const IO: MaxActive = MaxActive {
        ceiling: 100,
        reduce_to: 90,
    };

    /// Thresholds that drain almost completely once ten tasks are active.
    pub const SEQUENTIAL: MaxActive = MaxActive {
        ceiling: 10,
        reduce_to: 1,
    };

    /// Creates the thresholds.
    ///
    /// # Panics
    ///
    /// Panics if `ceiling` is zero or `reduce_to` is greater than `ceiling`.
    pub fn new(ceiling: usize, reduce_to: usize) -> Self {
        assert!(ceiling > 0, "ceiling must be positive");
        assert!(
            reduce_to <= ceiling,
            "reduce_to ({}) must not exceed ceiling ({})",
            reduce_to,
            ceiling
        );
        Self { ceiling, reduce_to }
    }

    /// Thresholds suited to CPU-bound work, sized by the number of processors.
    pub fn cpu() -> Self {
        *CPU
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn reduce_to(&self) -> usize {
        self.reduce_to
    }
}

impl Default for MaxActive {
    fn default() -> Self {
        Self::IO
    }
}

impl From<usize> for MaxActive {
    fn from(ceiling: usize) -> Self {
        MaxActive::new(ceiling, ceiling * 9 / 10)
    }
}

impl From<(usize, usize)> for MaxActive {
    fn from((ceiling, reduce_to): (usize, usize)) -> Self {
        MaxActive::new(ceiling, reduce_to)
    }
}

impl From<f64> for MaxActive {
    fn from(scale: f64) -> Self {
        Count::Scale(scale).to_absolute().into()
    }
}

impl From<Option<usize>> for MaxActive {
    fn from(ceiling: Option<usize>) -> Self {
        match ceiling {
            Some(ceiling) => ceiling.into(),
            None => MaxActive::IO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_active_conversions() {
        assert_eq!(MaxActive::from(10), MaxActive::new(10, 9));
        assert_eq!(MaxActive::from(1), MaxActive::new(1, 0));
        assert_eq!(MaxActive::from((8, 2)), MaxActive::new(8, 2));
        assert_eq!(MaxActive::from(None::<usize>), MaxActive::IO);

        let cpu = MaxActive::cpu();
        assert_eq!(cpu.ceiling(), num_cpus::get());
        assert_eq!(cpu.reduce_to() + 1, cpu.ceiling());
    }

    #[test]
    #[should_panic(expected = "must not exceed ceiling")]
    fn reduce_to_above_ceiling_is_rejected() {
        let _ = MaxActive::new(2, 3);
    }

    #[test]
    fn count_to_absolute() {
        assert_eq!(Count::from(3).to_absolute(), 3);
        assert_eq!(Count::from(None::<usize>).to_absolute(), num_cpus::get());
        assert_eq!(Count::from(2.0).to_absolute(), num_cpus::get() * 2);
    }

    #[test]
    #[should_panic(expected = "scaling value must be positive finite")]
    fn zero_scale_is_rejected() {
        let _ = Count::from(0.0).to_absolute();
    }
}
