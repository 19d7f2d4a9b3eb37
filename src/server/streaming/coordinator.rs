use std::sync::Mutex;

use tokio::sync::{mpsc, watch};

/// 缓冲与顺序协调器：单请求内持有推理文本与待冲刷的最终输出。
///
/// 写入方只有 Call B 的消费任务（串行），读取方（编排器）等待状态跃迁
/// 而非持锁轮询。最终输出在推理摘要可用之前一律留在队列里；即使上游流
/// 已经结束也不提前放行，顺序优先于延迟。
pub struct StreamCoordinator {
    reasoning: Mutex<String>,
    final_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    final_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    analysis_done: watch::Sender<bool>,
    stream_done: watch::Sender<bool>,
    failure: Mutex<Option<String>>,
}

impl Default for StreamCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCoordinator {
    pub fn new() -> Self {
        let (final_tx, final_rx) = mpsc::unbounded_channel();
        let (analysis_done, _) = watch::channel(false);
        let (stream_done, _) = watch::channel(false);
        Self {
            reasoning: Mutex::new(String::new()),
            final_tx: Mutex::new(Some(final_tx)),
            final_rx: Mutex::new(Some(final_rx)),
            analysis_done,
            stream_done,
            failure: Mutex::new(None),
        }
    }

    pub fn append_reasoning(&self, delta: &str) {
        self.reasoning.lock().unwrap().push_str(delta);
    }

    pub fn has_reasoning(&self) -> bool {
        !self.reasoning.lock().unwrap().is_empty()
    }

    /// 追加一段最终输出。冲刷开始前堆积在队列里，开始后由排空端实时消费。
    pub fn push_final(&self, delta: String) {
        if let Some(tx) = self.final_tx.lock().unwrap().as_ref() {
            let _ = tx.send(delta);
        }
    }

    /// 推理边界闭合（幂等）。
    pub fn mark_analysis_done(&self) {
        self.analysis_done.send_replace(true);
    }

    pub fn analysis_marked_done(&self) -> bool {
        *self.analysis_done.borrow()
    }

    /// 流结束（正常或失败）。关闭最终输出队列并记录失败原因。
    pub fn finish(&self, failure: Option<String>) {
        if let Some(message) = failure {
            *self.failure.lock().unwrap() = Some(message);
        }
        self.final_tx.lock().unwrap().take();
        self.stream_done.send_replace(true);
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().unwrap().clone()
    }

    /// 等待「推理边界闭合」或「流结束」，先到为准。
    pub async fn wait_reasoning_boundary(&self) {
        let mut analysis = self.analysis_done.subscribe();
        let mut stream = self.stream_done.subscribe();
        tokio::select! {
            _ = analysis.wait_for(|done| *done) => {}
            _ = stream.wait_for(|done| *done) => {}
        }
    }

    /// 截取前 max_chars 个字符的推理文本（确定性截断，字符边界安全）。
    pub fn reasoning_snapshot(&self, max_chars: usize) -> String {
        let text = self.reasoning.lock().unwrap();
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => text[..idx].to_string(),
            None => text.clone(),
        }
    }

    /// 移交最终输出队列的接收端；只在冲刷跃迁处调用一次。
    pub fn take_final_receiver(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.final_rx.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn final_output_is_withheld_until_receiver_taken() {
        let coordinator = StreamCoordinator::new();
        coordinator.push_final("a".into());
        coordinator.push_final("b".into());
        coordinator.finish(None);

        let mut rx = coordinator.take_final_receiver().unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
        assert!(rx.recv().await.is_none());
        assert!(coordinator.take_final_receiver().is_none());
    }

    #[tokio::test]
    async fn boundary_wait_releases_on_analysis_done() {
        let coordinator = std::sync::Arc::new(StreamCoordinator::new());
        let waiter = coordinator.clone();
        let handle = tokio::spawn(async move { waiter.wait_reasoning_boundary().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.mark_analysis_done();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("boundary wait should release")
            .unwrap();
    }

    #[tokio::test]
    async fn boundary_wait_releases_on_stream_end_without_analysis() {
        let coordinator = std::sync::Arc::new(StreamCoordinator::new());
        let waiter = coordinator.clone();
        let handle = tokio::spawn(async move { waiter.wait_reasoning_boundary().await });
        coordinator.finish(Some("boom".into()));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("boundary wait should release")
            .unwrap();
        assert_eq!(coordinator.failure().as_deref(), Some("boom"));
    }

    #[test]
    fn reasoning_snapshot_truncates_on_char_boundary() {
        let coordinator = StreamCoordinator::new();
        coordinator.append_reasoning("思考ABC");
        assert_eq!(coordinator.reasoning_snapshot(3), "思考A");
        assert_eq!(coordinator.reasoning_snapshot(100), "思考ABC");
        assert_eq!(coordinator.reasoning_snapshot(0), "");
    }

    #[test]
    fn push_after_finish_is_dropped() {
        let coordinator = StreamCoordinator::new();
        coordinator.finish(None);
        coordinator.push_final("late".into());
        let mut rx = coordinator.take_final_receiver().unwrap();
        assert!(rx.try_recv().is_err());
    }
}
