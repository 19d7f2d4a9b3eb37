pub const OPEN_ANALYSIS: &str = "<analysis>";
pub const CLOSE_ANALYSIS: &str = "</analysis>";
pub const OPEN_FINAL: &str = "<final>";
pub const CLOSE_FINAL: &str = "</final>";

/// 解析器所处的流位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// 尚未见到任何边界标签，等待 `<analysis>`（或直接出现的 `<final>`）。
    BeforeAnalysis,
    InAnalysis,
    /// `</analysis>` 已闭合，等待 `<final>`。
    BeforeFinal,
    InFinal,
    /// `</final>` 之后：剩余字节全部忽略。
    AfterFinal,
}

/// 一次 `feed`/`finalize` 产出的已分类增量。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedIncrement {
    pub reasoning_delta: String,
    pub final_delta: String,
    /// 本次调用中推理边界是否闭合。
    pub analysis_done: bool,
    pub final_done: bool,
}

/// 增量式标签边界解析器。
///
/// 标签可能被任意切分到多个 delta 里，因此每个状态都只释放「确认不含
/// 标签前缀」的部分，末尾可能构成半个标签的后缀留在暂存区，待下一个
/// delta 或 `finalize` 时归类。畸形/乱序标签一律按当前模式的字面内容
/// 处理，解析器本身永不报错。
pub struct TagParser {
    mode: Mode,
    carry: String,
    seen_any_tag: bool,
}

impl Default for TagParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TagParser {
    pub fn new() -> Self {
        Self {
            mode: Mode::BeforeAnalysis,
            carry: String::new(),
            seen_any_tag: false,
        }
    }

    /// 是否见过任一边界标签。整条流都没有标签时，调用方将原始内容整体
    /// 回退为最终输出。
    pub fn seen_any_tag(&self) -> bool {
        self.seen_any_tag
    }

    /// 推理边界是否仍未闭合。
    pub fn in_analysis(&self) -> bool {
        self.mode == Mode::InAnalysis
    }

    pub fn feed(&mut self, text: &str) -> ParsedIncrement {
        self.carry.push_str(text);
        let mut out = ParsedIncrement::default();

        loop {
            match self.mode {
                Mode::BeforeAnalysis => {
                    let idx_a = self.carry.find(OPEN_ANALYSIS);
                    let idx_f = self.carry.find(OPEN_FINAL);
                    let hit = match (idx_a, idx_f) {
                        (None, None) => None,
                        (Some(a), None) => Some((a, OPEN_ANALYSIS, Mode::InAnalysis)),
                        (None, Some(f)) => Some((f, OPEN_FINAL, Mode::InFinal)),
                        // 两个开标签都在场时取先出现者
                        (Some(a), Some(f)) if a < f => Some((a, OPEN_ANALYSIS, Mode::InAnalysis)),
                        (Some(_), Some(f)) => Some((f, OPEN_FINAL, Mode::InFinal)),
                    };
                    let Some((idx, tag, mode)) = hit else {
                        break;
                    };
                    self.seen_any_tag = true;
                    self.carry.drain(..idx + tag.len());
                    self.mode = mode;
                }
                Mode::InAnalysis => {
                    if let Some(idx) = self.carry.find(CLOSE_ANALYSIS) {
                        out.reasoning_delta.push_str(&self.carry[..idx]);
                        self.carry.drain(..idx + CLOSE_ANALYSIS.len());
                        self.mode = Mode::BeforeFinal;
                        out.analysis_done = true;
                    } else {
                        let safe = self.safe_release_len(CLOSE_ANALYSIS);
                        if safe > 0 {
                            out.reasoning_delta.push_str(&self.carry[..safe]);
                            self.carry.drain(..safe);
                        }
                        break;
                    }
                }
                Mode::BeforeFinal => {
                    if let Some(idx) = self.carry.find(OPEN_FINAL) {
                        self.carry.drain(..idx + OPEN_FINAL.len());
                        self.mode = Mode::InFinal;
                    } else {
                        break;
                    }
                }
                Mode::InFinal => {
                    if let Some(idx) = self.carry.find(CLOSE_FINAL) {
                        out.final_delta.push_str(&self.carry[..idx]);
                        self.carry.drain(..idx + CLOSE_FINAL.len());
                        self.mode = Mode::AfterFinal;
                        out.final_done = true;
                    } else {
                        let safe = self.safe_release_len(CLOSE_FINAL);
                        if safe > 0 {
                            out.final_delta.push_str(&self.carry[..safe]);
                            self.carry.drain(..safe);
                        }
                        break;
                    }
                }
                Mode::AfterFinal => {
                    self.carry.clear();
                    break;
                }
            }
        }

        out
    }

    /// 流结束时冲刷暂存区：推理态/等待 `<final>` 态的剩余内容归为推理，
    /// 最终态的剩余内容归为最终输出，`</final>` 之后的内容丢弃。
    pub fn finalize(&mut self) -> ParsedIncrement {
        let mut out = ParsedIncrement::default();
        match self.mode {
            Mode::InAnalysis => {
                if !self.carry.is_empty() {
                    out.reasoning_delta = std::mem::take(&mut self.carry);
                    out.analysis_done = true;
                }
            }
            Mode::BeforeFinal => {
                if !self.carry.is_empty() {
                    out.reasoning_delta = std::mem::take(&mut self.carry);
                }
            }
            Mode::InFinal => {
                if !self.carry.is_empty() {
                    out.final_delta = std::mem::take(&mut self.carry);
                }
            }
            Mode::AfterFinal => {
                out.final_done = true;
                self.carry.clear();
            }
            Mode::BeforeAnalysis => {
                self.carry.clear();
            }
        }
        out
    }

    /// 可安全释放的前缀长度：保留可能是 `tag` 前缀的最长后缀，
    /// 并对齐到字符边界，避免切开多字节字符。
    fn safe_release_len(&self, tag: &str) -> usize {
        let mut safe = self.carry.len().saturating_sub(tag.len() - 1);
        while safe > 0 && !self.carry.is_char_boundary(safe) {
            safe -= 1;
        }
        safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 喂入一串 delta 并 finalize，返回 (推理全文, 最终全文, seen_any_tag)。
    fn run(chunks: &[&str]) -> (String, String, bool) {
        let mut parser = TagParser::new();
        let mut reasoning = String::new();
        let mut final_text = String::new();
        for chunk in chunks {
            let inc = parser.feed(chunk);
            reasoning.push_str(&inc.reasoning_delta);
            final_text.push_str(&inc.final_delta);
        }
        let inc = parser.finalize();
        reasoning.push_str(&inc.reasoning_delta);
        final_text.push_str(&inc.final_delta);
        (reasoning, final_text, parser.seen_any_tag())
    }

    #[test]
    fn single_chunk_classifies_both_sections() {
        let (reasoning, final_text, seen) =
            run(&["<analysis>thinking</analysis><final>answer</final>"]);
        assert_eq!(reasoning, "thinking");
        assert_eq!(final_text, "answer");
        assert!(seen);
    }

    #[test]
    fn analysis_done_fires_on_close_tag() {
        let mut parser = TagParser::new();
        let inc = parser.feed("<analysis>abc");
        assert!(!inc.analysis_done);
        let inc = parser.feed("</analysis>");
        assert!(inc.analysis_done);
        assert!(!parser.in_analysis());
    }

    #[test]
    fn chunk_boundary_independence() {
        let text = "<analysis>step 1, 思考中…</analysis><final>蓝色 blue ✔</final>";
        let reference = run(&[text]);

        // 任意二分
        for i in 0..=text.len() {
            if !text.is_char_boundary(i) {
                continue;
            }
            let (a, b) = text.split_at(i);
            assert_eq!(run(&[a, b]), reference, "split at {}", i);
        }

        // 固定窗口切片
        for size in 1..=7 {
            let mut chunks: Vec<&str> = Vec::new();
            let mut start = 0;
            while start < text.len() {
                let mut end = (start + size).min(text.len());
                while !text.is_char_boundary(end) {
                    end += 1;
                }
                chunks.push(&text[start..end]);
                start = end;
            }
            assert_eq!(run(&chunks), reference, "window size {}", size);
        }
    }

    #[test]
    fn no_tags_yields_nothing_and_no_tag_seen() {
        let (reasoning, final_text, seen) = run(&["The sky is blue ", "because scattering."]);
        assert_eq!(reasoning, "");
        assert_eq!(final_text, "");
        assert!(!seen);
    }

    #[test]
    fn missing_final_classifies_rest_as_reasoning() {
        let (reasoning, final_text, _) = run(&["<analysis>thinking...no close"]);
        assert_eq!(reasoning, "thinking...no close");
        assert_eq!(final_text, "");
    }

    #[test]
    fn text_after_closed_analysis_without_final_is_reasoning() {
        let (reasoning, final_text, _) = run(&["<analysis>a</analysis>", "trailing thoughts"]);
        assert_eq!(reasoning, "atrailing thoughts");
        assert_eq!(final_text, "");
    }

    #[test]
    fn final_without_analysis_is_accepted() {
        let (reasoning, final_text, seen) = run(&["<final>direct answer</final>"]);
        assert_eq!(reasoning, "");
        assert_eq!(final_text, "direct answer");
        assert!(seen);
    }

    #[test]
    fn nested_analysis_tag_is_literal_content() {
        let (reasoning, final_text, _) =
            run(&["<analysis>a <analysis> b</analysis><final>ok</final>"]);
        assert_eq!(reasoning, "a <analysis> b");
        assert_eq!(final_text, "ok");
    }

    #[test]
    fn close_final_before_open_is_ignored_as_preamble() {
        let (reasoning, final_text, _) = run(&["x</final><final>ok</final>"]);
        assert_eq!(reasoning, "");
        assert_eq!(final_text, "ok");
    }

    #[test]
    fn bytes_after_close_final_are_discarded() {
        let (reasoning, final_text, _) =
            run(&["<analysis>a</analysis><final>b</final>", "trailing junk"]);
        assert_eq!(reasoning, "a");
        assert_eq!(final_text, "b");
    }

    #[test]
    fn partial_tag_at_stream_end_flushes_as_content() {
        let (reasoning, final_text, _) = run(&["<analysis>thought</analysi"]);
        assert_eq!(reasoning, "thought</analysi");
        assert_eq!(final_text, "");
    }

    #[test]
    fn multibyte_content_never_splits_chars() {
        let text = "<analysis>思考🤔过程</analysis><final>答案✅</final>";
        // 按单字节窗口强制把多字节字符切开喂入
        let bytes = text.as_bytes();
        let mut parser = TagParser::new();
        let mut reasoning = String::new();
        let mut final_text = String::new();
        let mut start = 0;
        while start < bytes.len() {
            let mut end = (start + 1).min(bytes.len());
            while !text.is_char_boundary(end) {
                end += 1;
            }
            let inc = parser.feed(&text[start..end]);
            reasoning.push_str(&inc.reasoning_delta);
            final_text.push_str(&inc.final_delta);
            start = end;
        }
        let inc = parser.finalize();
        reasoning.push_str(&inc.reasoning_delta);
        final_text.push_str(&inc.final_delta);
        assert_eq!(reasoning, "思考🤔过程");
        assert_eq!(final_text, "答案✅");
    }
}
