use once_cell::sync::Lazy;
use regex::Regex;

static TARGET_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"in target: ([^\s)]+)").unwrap());

const CONTINUATION_INDENT: usize = 4;

/// A header line plus the indented lines that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordGroup {
    pub header: String,
    pub body: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    Idle,
    Accumulating(RecordGroup),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub lines: usize,
    pub headers: usize,
    pub noise: usize,
    pub empty_groups: usize,
}

/// Segments a build log into per-step record groups.
pub struct LogScanner {
    state: ScanState,
    stats: ScanStats,
}

impl LogScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Idle,
            stats: ScanStats::default(),
        }
    }

    /// Push one line; returns the group this line closed, if it had a body.
    pub fn feed(&mut self, line: &str) -> Option<RecordGroup> {
        self.stats.lines += 1;

        if is_target_header(line) {
            self.stats.headers += 1;
            let next = ScanState::Accumulating(RecordGroup {
                header: line.to_string(),
                body: Vec::new(),
            });
            let previous = std::mem::replace(&mut self.state, next);
            return self.emit(previous);
        }

        match &mut self.state {
            ScanState::Accumulating(group) if leading_spaces(line) == CONTINUATION_INDENT => {
                group.body.push(line.to_string());
            }
            _ => self.stats.noise += 1,
        }

        None
    }

    /// Flush the pending group at end of stream.
    pub fn finish(&mut self) -> Option<RecordGroup> {
        let pending = std::mem::replace(&mut self.state, ScanState::Idle);
        self.emit(pending)
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    fn emit(&mut self, state: ScanState) -> Option<RecordGroup> {
        match state {
            ScanState::Accumulating(group) if !group.body.is_empty() => Some(group),
            ScanState::Accumulating(_) => {
                self.stats.empty_groups += 1;
                None
            }
            ScanState::Idle => None,
        }
    }
}

impl Default for LogScanner {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_target_header(line: &str) -> bool {
    TARGET_HEADER.is_match(line)
}

fn leading_spaces(line: &str) -> usize {
    line.bytes().take_while(|&b| b == b' ').count()
}

/// Run a whole in-memory log through a scanner.
pub fn scan_lines<'a, I>(lines: I) -> Vec<RecordGroup>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scanner = LogScanner::new();
    let mut groups: Vec<RecordGroup> = lines
        .into_iter()
        .filter_map(|line| scanner.feed(line))
        .collect();
    groups.extend(scanner.finish());
    groups
}
