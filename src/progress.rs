use std::io::Write;

use log::debug;

/// 进度指示
///
/// 遍历所有要素时，遍历器在开始时调用 [Progress::start]，
/// 每处理一个要素调用一次 [Progress::update]，结束时调用 [Progress::complete]。
pub trait Progress {
    /// 开始计数，`total` 是要素总数（未知时为 `None`）
    fn start(&mut self, total: Option<usize>);

    fn update(&mut self);

    fn complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Idle,
    /// 已知总数时按百分比输出
    Percent {
        total: usize,
        incr: f64,
        next: f64,
        current: f64,
    },
    /// 总数未知时每处理 `every` 个要素输出一次计数
    Counter { every: usize },
}

/// 把进度写到输出流的 [Progress] 实现
///
/// 已知要素总数时输出 `0% 10% 20% ... 100%`，每次至少前进 `step` 个百分点；
/// 总数未知时输出 `0 n 2n ...`，每处理 `step` 个要素输出一次。
#[derive(Debug)]
pub struct ProgressReporter<W: Write> {
    out: W,
    step: f64,
    count: usize,
    mode: Mode,
}

impl<W: Write> ProgressReporter<W> {
    pub fn new(out: W, step: f64) -> Self {
        ProgressReporter {
            out,
            step,
            count: 0,
            mode: Mode::Idle,
        }
    }

    /// 取回输出流
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            debug!("无法输出进度: {}", e);
        }
    }
}

impl<W: Write> Progress for ProgressReporter<W> {
    fn start(&mut self, total: Option<usize>) {
        self.count = 0;
        self.mode = match total {
            Some(total) => {
                let incr = if total > 0 {
                    self.step.max(100. / total as f64)
                } else {
                    100.
                };
                Mode::Percent {
                    total,
                    incr,
                    next: incr,
                    current: 0.,
                }
            }
            None => Mode::Counter {
                every: (self.step as usize).max(1),
            },
        };
        match self.mode {
            Mode::Percent { .. } => self.emit("0% "),
            _ => self.emit("0 "),
        }
    }

    fn update(&mut self) {
        self.count += 1;
        let count = self.count;
        match &mut self.mode {
            Mode::Idle => {}
            Mode::Percent {
                total,
                incr,
                next,
                current,
            } => {
                if *total == 0 {
                    return;
                }
                *current = 100. * count as f64 / *total as f64;
                let text = if *current >= *next {
                    *next += *incr;
                    Some(if *current < 100. {
                        format!("{:.0}% ", current)
                    } else {
                        "100%".to_string()
                    })
                } else {
                    None
                };
                if *next > 100. {
                    *next = 100.;
                }
                if let Some(text) = text {
                    self.emit(&text);
                }
            }
            Mode::Counter { every } => {
                if count % *every == 0 {
                    self.emit(&format!("{} ", count));
                }
            }
        }
    }

    fn complete(&mut self) {
        match self.mode {
            Mode::Idle => {}
            Mode::Percent { current, .. } => {
                if current < 100. {
                    self.emit("100%");
                }
            }
            Mode::Counter { every } => {
                if self.count % every != 0 {
                    let text = self.count.to_string();
                    self.emit(&text);
                }
            }
        }
        self.mode = Mode::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(total: Option<usize>, step: f64, updates: usize) -> String {
        let mut progress = ProgressReporter::new(Vec::new(), step);
        progress.start(total);
        for _ in 0..updates {
            progress.update();
        }
        progress.complete();
        String::from_utf8(progress.into_inner()).unwrap()
    }

    #[test]
    fn percentages() {
        assert_eq!(run(Some(4), 10., 4), "0% 25% 50% 75% 100%");
        assert_eq!(run(Some(10), 50., 10), "0% 50% 100%");
        assert_eq!(run(Some(4), 10., 2), "0% 25% 50% 100%");
    }

    #[test]
    fn counter() {
        assert_eq!(run(None, 2., 5), "0 2 4 5");
        assert_eq!(run(None, 2., 4), "0 2 4 ");
    }
}
