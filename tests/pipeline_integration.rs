//! End-to-end pipeline tests with a fake backend and recording sinks:
//! fetched message → extraction → prompt substitution → summary → sinks.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use inbox_digest::dispatch::Dispatcher;
use inbox_digest::error::{LlmError, SinkError};
use inbox_digest::fetch::FetchedMail;
use inbox_digest::llm::Summarizer;
use inbox_digest::sinks::{EmailReplySink, SummarySink, WebhookPayload};

const TEMPLATE: &str = "请总结以下聊天记录：[CHAT-RECORD]";

fn digest_mail(body: &[u8]) -> FetchedMail {
    FetchedMail {
        seq: 12,
        subject: "老王的聊天记录".to_string(),
        sender: Some("laowang@example.com".to_string()),
        sections: vec![body.to_vec()],
    }
}

struct FakeSummarizer {
    prompts: Mutex<Vec<String>>,
    reply: Result<String, ()>,
}

impl FakeSummarizer {
    fn ok(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            reply: Ok(reply.to_string()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            reply: Err(()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Ok(summary) => Ok(summary.clone()),
            Err(()) => Err(LlmError::NoChoices),
        }
    }
}

struct RecordingSink {
    deliveries: Mutex<Vec<(String, Option<String>, String)>>,
    fail: bool,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    fn deliveries(&self) -> Vec<(String, Option<String>, String)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SummarySink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, summary: &str, mail: &FetchedMail) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Webhook("connection refused".to_string()));
        }
        self.deliveries.lock().unwrap().push((
            summary.to_string(),
            mail.sender.clone(),
            mail.subject.clone(),
        ));
        Ok(())
    }
}

#[tokio::test]
async fn matching_message_flows_to_both_sinks() {
    let summarizer = FakeSummarizer::ok("一句话摘要");
    let webhook = RecordingSink::new();
    let email = RecordingSink::new();
    let dispatcher = Dispatcher::new(
        summarizer.clone(),
        vec![webhook.clone(), email.clone()],
        TEMPLATE.to_string(),
    );

    dispatcher
        .handle(&digest_mail(b"Content-Transfer-Encoding: base64\nQUJD\n--end"))
        .await;

    // The backend saw the decoded content substituted into the template.
    assert_eq!(summarizer.prompts(), vec!["请总结以下聊天记录：ABC".to_string()]);

    // Both sinks got the summary, addressed back to the original sender.
    for sink in [&webhook, &email] {
        let deliveries = sink.deliveries();
        assert_eq!(deliveries.len(), 1);
        let (summary, sender, subject) = &deliveries[0];
        assert_eq!(summary, "一句话摘要");
        assert_eq!(sender.as_deref(), Some("laowang@example.com"));
        assert_eq!(subject, "老王的聊天记录");
    }
}

#[tokio::test]
async fn webhook_envelope_and_reply_headers_match_contract() {
    let mail = digest_mail(b"base64\nQUJD\n--");
    let summary = "一句话摘要";

    let payload = serde_json::to_value(WebhookPayload::text(summary)).unwrap();
    assert_eq!(
        payload,
        serde_json::json!({"msgtype": "text", "text": {"content": summary}})
    );

    let reply = EmailReplySink::build_reply("bot@qq.com", &mail, summary).unwrap();
    let recipients: Vec<String> = reply.envelope().to().iter().map(ToString::to_string).collect();
    assert_eq!(recipients, vec!["laowang@example.com".to_string()]);
    assert_eq!(
        EmailReplySink::reply_subject(&mail.subject),
        "摘要：老王的聊天记录"
    );
}

#[tokio::test]
async fn unreadable_message_is_skipped_before_the_backend() {
    let summarizer = FakeSummarizer::ok("unused");
    let sink = RecordingSink::new();
    let dispatcher = Dispatcher::new(
        summarizer.clone(),
        vec![sink.clone()],
        TEMPLATE.to_string(),
    );

    let mut mail = digest_mail(b"");
    mail.sections.clear();
    dispatcher.handle(&mail).await;

    assert!(summarizer.prompts().is_empty());
    assert!(sink.deliveries().is_empty());
}

#[tokio::test]
async fn backend_failure_skips_sinks_but_not_later_messages() {
    let summarizer = FakeSummarizer::failing();
    let sink = RecordingSink::new();
    let dispatcher = Dispatcher::new(
        summarizer.clone(),
        vec![sink.clone()],
        TEMPLATE.to_string(),
    );

    dispatcher.handle(&digest_mail(b"base64\nQUJD\n--")).await;
    dispatcher.handle(&digest_mail(b"base64\nWFla\n--")).await;

    // Both messages reached the backend despite the first failure.
    assert_eq!(summarizer.prompts().len(), 2);
    assert!(sink.deliveries().is_empty());
}

#[tokio::test]
async fn one_failing_sink_does_not_block_the_other() {
    let summarizer = FakeSummarizer::ok("摘要");
    let broken = RecordingSink::failing();
    let working = RecordingSink::new();
    let dispatcher = Dispatcher::new(
        summarizer,
        vec![broken.clone(), working.clone()],
        TEMPLATE.to_string(),
    );

    dispatcher.handle(&digest_mail(b"base64\nQUJD\n--")).await;

    assert!(broken.deliveries().is_empty());
    assert_eq!(working.deliveries().len(), 1);
}

#[tokio::test]
async fn dispatcher_drains_channel_in_fifo_order_then_stops() {
    let summarizer = FakeSummarizer::ok("摘要");
    let sink = RecordingSink::new();
    let dispatcher = Dispatcher::new(
        summarizer.clone(),
        vec![sink.clone()],
        "[CHAT-RECORD]".to_string(),
    );

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let handle = tokio::spawn(dispatcher.run(rx));

    for body in [&b"base64\nQUJD\n--"[..], &b"base64\nREVG\n--"[..], &b"base64\nWFla\n--"[..]] {
        tx.send(digest_mail(body)).await.unwrap();
    }
    drop(tx);
    handle.await.unwrap();

    assert_eq!(
        summarizer.prompts(),
        vec!["ABC".to_string(), "DEF".to_string(), "XYZ".to_string()]
    );
    assert_eq!(sink.deliveries().len(), 3);
}
