//! repair/score — оценка полноты восстановления и прогресс прохода.
//!
//! Score: у каждой таблицы равный вес 1/N. После обхода таблица добавляет
//!   weight * (0.5 * decoded_pages/referenced_pages + 0.5 * assembled_cells/expected_cells).
//! Внутри прохода score только растёт и остаётся в [0,1].

use serde::Serialize;

/// Итог обхода одной таблицы.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableTally {
    pub decoded_pages: u64,
    pub referenced_pages: u64,
    pub assembled_cells: u64,
    pub expected_cells: u64,
}

impl TableTally {
    pub fn fraction(&self) -> f64 {
        if self.referenced_pages == 0 {
            return 0.0;
        }
        let pages = self.decoded_pages as f64 / self.referenced_pages as f64;
        // пустая таблица: доля ячеек равна доле страниц
        let cells = if self.expected_cells == 0 {
            pages
        } else {
            self.assembled_cells as f64 / self.expected_cells as f64
        };
        (0.5 * pages + 0.5 * cells).clamp(0.0, 1.0)
    }

    pub fn merge(&mut self, other: &TableTally) {
        self.decoded_pages += other.decoded_pages;
        self.referenced_pages += other.referenced_pages;
        self.assembled_cells += other.assembled_cells;
        self.expected_cells += other.expected_cells;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Score {
    value: f64,
    weight: Option<f64>,
}

impl Score {
    pub fn new() -> Self {
        Self::default()
    }

    /// Задать число таблиц прохода. Повторный вызов не меняет вес.
    pub fn set_tables(&mut self, tables: usize) {
        if self.weight.is_none() && tables > 0 {
            self.weight = Some(1.0 / tables as f64);
        }
    }

    pub fn is_sized(&self) -> bool {
        self.weight.is_some()
    }

    pub fn add_table(&mut self, tally: &TableTally) {
        if let Some(w) = self.weight {
            self.value = (self.value + w * tally.fraction()).min(1.0);
        }
    }

    /// Без таблиц оценкой служит доля прочитанного каталога.
    pub fn set_fraction(&mut self, fraction: f64) {
        if self.weight.is_none() {
            self.value = self.value.max(fraction.clamp(0.0, 1.0));
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

type ProgressFn<'p> = Box<dyn FnMut(f64, f64) -> bool + 'p>;

/// Монотонный прогресс [0,1] с колбэком (progress, increment) -> продолжать?
pub struct Progress<'p> {
    value: f64,
    callback: Option<ProgressFn<'p>>,
    cancelled: bool,
}

impl<'p> Progress<'p> {
    pub fn new() -> Self {
        Self {
            value: 0.0,
            callback: None,
            cancelled: false,
        }
    }

    pub fn with_callback(callback: impl FnMut(f64, f64) -> bool + 'p) -> Self {
        Self {
            value: 0.0,
            callback: Some(Box::new(callback)),
            cancelled: false,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Увеличить прогресс. false — колбэк попросил остановиться.
    pub fn increase(&mut self, increment: f64) -> bool {
        if increment <= 0.0 {
            return !self.cancelled;
        }
        let next = (self.value + increment).min(1.0);
        let inc = next - self.value;
        self.value = next;
        if inc > 0.0 {
            if let Some(cb) = self.callback.as_mut() {
                if !cb(self.value, inc) {
                    self.cancelled = true;
                }
            }
        }
        !self.cancelled
    }

    pub fn finish(&mut self) -> bool {
        let rest = 1.0 - self.value;
        self.increase(rest)
    }

    /// Новый этап: значение с нуля, колбэк остаётся.
    pub fn reset(&mut self) {
        self.value = 0.0;
        self.cancelled = false;
    }
}

impl Default for Progress<'_> {
    fn default() -> Self {
        Self::new()
    }
}
