#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end conversation tests against in-memory channel adapters.

use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::stream,
    image::{DynamicImage, ImageFormat, Rgb, RgbImage},
    tempfile::TempDir,
};

use {
    lembar_channels::{
        AttachmentFetcher, ByteStream, ChannelEvent, ChannelOutbound, Error as ChannelError,
        InboundContent, InboundMessage, OutboundDocument, Result as ChannelResult, event_channel,
    },
    lembar_chat::{Dispatcher, Engine, Error},
    lembar_common::{ConversationId, MediaRef, MessageId},
    lembar_config::LembarConfig,
    lembar_sessions::{Phase, SessionStore},
};

// ── Fixtures ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Sent {
    Text {
        to: String,
        text: String,
        quoted: Option<String>,
    },
    Document {
        to: String,
        file_name: String,
        mime_type: String,
        quoted: Option<String>,
        path: PathBuf,
        bytes: Vec<u8>,
    },
}

impl Sent {
    fn to(&self) -> &str {
        match self {
            Self::Text { to, .. } | Self::Document { to, .. } => to,
        }
    }
}

#[derive(Default)]
struct RecordingOutbound {
    sent: Mutex<Vec<Sent>>,
    read: Mutex<Vec<String>>,
    fail_documents: AtomicBool,
}

impl RecordingOutbound {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_to(&self, to: &str) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.to() == to).collect()
    }

    fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                Sent::Document { .. } => None,
            })
            .collect()
    }

    fn documents(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Document { .. }))
            .collect()
    }
}

#[async_trait]
impl ChannelOutbound for RecordingOutbound {
    async fn send_text(
        &self,
        to: &ConversationId,
        text: &str,
        quoted: Option<&MessageId>,
    ) -> ChannelResult<()> {
        self.sent.lock().unwrap().push(Sent::Text {
            to: to.to_string(),
            text: text.to_string(),
            quoted: quoted.map(ToString::to_string),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        to: &ConversationId,
        document: &OutboundDocument,
    ) -> ChannelResult<()> {
        let bytes = tokio::fs::read(&document.path).await.unwrap();
        self.sent.lock().unwrap().push(Sent::Document {
            to: to.to_string(),
            file_name: document.file_name.clone(),
            mime_type: document.mime_type.clone(),
            quoted: document.quoted.as_ref().map(ToString::to_string),
            path: document.path.clone(),
            bytes,
        });
        if self.fail_documents.load(Ordering::SeqCst) {
            return Err(ChannelError::delivery("peer unreachable"));
        }
        Ok(())
    }

    async fn mark_read(&self, _to: &ConversationId, message_id: &MessageId) -> ChannelResult<()> {
        self.read.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

/// Serves registered blobs in three chunks; unknown references fail.
#[derive(Default)]
struct MapFetcher {
    blobs: Mutex<HashMap<String, Bytes>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl MapFetcher {
    fn insert(&self, media: &str, bytes: Bytes) {
        self.blobs.lock().unwrap().insert(media.to_string(), bytes);
    }

    fn delay(&self, media: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(media.to_string(), delay);
    }
}

#[async_trait]
impl AttachmentFetcher for MapFetcher {
    async fn fetch(&self, media: &MediaRef) -> ChannelResult<ByteStream> {
        let delay = self.delays.lock().unwrap().get(media.as_str()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let blob = self
            .blobs
            .lock()
            .unwrap()
            .get(media.as_str())
            .cloned()
            .ok_or_else(|| ChannelError::fetch(format!("media {media} expired")))?;
        let third = blob.len() / 3;
        let chunks: Vec<ChannelResult<Bytes>> = vec![
            Ok(blob.slice(..third)),
            Ok(blob.slice(third..2 * third)),
            Ok(blob.slice(2 * third..)),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

struct Harness {
    engine: Arc<Engine>,
    store: Arc<SessionStore>,
    outbound: Arc<RecordingOutbound>,
    fetcher: Arc<MapFetcher>,
    temp_dir: PathBuf,
    _tmp: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(LembarConfig::default())
    }

    fn with_config(mut config: LembarConfig) -> Self {
        let tmp = TempDir::new().unwrap();
        let temp_dir = tmp.path().join("artifacts");
        config.document.temp_dir = Some(temp_dir.clone());

        let store = Arc::new(SessionStore::new());
        let outbound = Arc::new(RecordingOutbound::default());
        let fetcher = Arc::new(MapFetcher::default());
        let engine = Arc::new(Engine::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&fetcher) as Arc<dyn AttachmentFetcher>,
            Arc::clone(&outbound) as Arc<dyn ChannelOutbound>,
        ));
        Self {
            engine,
            store,
            outbound,
            fetcher,
            temp_dir,
            _tmp: tmp,
        }
    }

    /// Register an image and return the message that carries it.
    fn image(&self, to: &str, id: &str, bytes: Bytes) -> InboundMessage {
        let media = format!("media-{to}-{id}");
        self.fetcher.insert(&media, bytes);
        image_message(to, id, &media)
    }

    async fn send(&self, message: InboundMessage) {
        self.engine.handle(message).await;
    }

    async fn phase(&self, to: &str) -> Option<Phase> {
        self.store
            .snapshot(&ConversationId::new(to))
            .await
            .map(|s| s.phase())
    }

    fn leftover_artifacts(&self) -> usize {
        match std::fs::read_dir(&self.temp_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

const PEER: &str = "628111@s.whatsapp.net";

fn image_message(to: &str, id: &str, media: &str) -> InboundMessage {
    InboundMessage {
        conversation: ConversationId::new(to),
        message_id: MessageId::new(id),
        sender_name: Some("Tester".into()),
        content: InboundContent::Image(MediaRef::new(media)),
    }
}

fn text(to: &str, id: &str, body: &str) -> InboundMessage {
    InboundMessage {
        conversation: ConversationId::new(to),
        message_id: MessageId::new(id),
        sender_name: None,
        content: InboundContent::Text(body.into()),
    }
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Bytes {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 160, 30])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    Bytes::from(buf.into_inner())
}

fn png(width: u32, height: u32) -> Bytes {
    encode(width, height, ImageFormat::Png)
}

fn jpeg(width: u32, height: u32) -> Bytes {
    encode(width, height, ImageFormat::Jpeg)
}

fn page_sizes(pdf: &[u8]) -> Vec<(i64, i64)> {
    let doc = lopdf::Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| {
            let page = doc.get_object(id).unwrap().as_dict().unwrap();
            let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
            (
                media_box[2].as_i64().unwrap(),
                media_box[3].as_i64().unwrap(),
            )
        })
        .collect()
}

fn document(sent: &Sent) -> (&str, &str, Option<&str>, &Path, &[u8]) {
    match sent {
        Sent::Document {
            file_name,
            mime_type,
            quoted,
            path,
            bytes,
            ..
        } => (
            file_name.as_str(),
            mime_type.as_str(),
            quoted.as_deref(),
            path.as_path(),
            bytes.as_slice(),
        ),
        Sent::Text { text, .. } => panic!("expected document, got text {text:?}"),
    }
}

// ── Single conversation ─────────────────────────────────────────────────────

#[tokio::test]
async fn vacation_photos_walkthrough() {
    let h = Harness::new();
    h.send(h.image(PEER, "img1", png(10, 20))).await;
    h.send(h.image(PEER, "img2", jpeg(30, 40))).await;
    h.send(text(PEER, "t1", "selesai")).await;
    h.send(text(PEER, "t2", "Vacation Photos")).await;

    let sent = h.outbound.sent();
    assert_eq!(sent.len(), 6, "{sent:#?}");

    let Sent::Text { text, quoted, .. } = &sent[0] else {
        panic!("expected acknowledgement");
    };
    assert!(text.contains("(1)"));
    assert_eq!(quoted.as_deref(), Some("img1"));
    let Sent::Text { text, quoted, .. } = &sent[1] else {
        panic!("expected acknowledgement");
    };
    assert!(text.contains("(2)"));
    assert_eq!(quoted.as_deref(), Some("img2"));
    assert!(matches!(&sent[2], Sent::Text { text, .. } if text.contains("nama file PDF")));
    assert!(matches!(&sent[3], Sent::Text { text, .. } if text.contains("2 gambar")));

    let (file_name, mime_type, quoted, path, bytes) = document(&sent[4]);
    assert_eq!(file_name, "Vacation Photos.pdf");
    assert_eq!(mime_type, "application/pdf");
    assert_eq!(quoted, Some("img2"));
    assert!(path.starts_with(&h.temp_dir));
    assert_eq!(page_sizes(bytes), vec![(10, 20), (30, 40)]);

    assert!(
        matches!(&sent[5], Sent::Text { text, .. } if text.contains("\"Vacation Photos.pdf\""))
    );
    assert_eq!(h.phase(PEER).await, Some(Phase::Idle));
    assert!(!path.exists());
    assert_eq!(h.leftover_artifacts(), 0);
    assert_eq!(h.outbound.read.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn pages_follow_arrival_order() {
    let h = Harness::new();
    let sizes = [(3, 4), (5, 6), (7, 8), (9, 10), (11, 12)];
    for (i, &(w, hgt)) in sizes.iter().enumerate() {
        h.send(h.image(PEER, &format!("m{i}"), png(w, hgt))).await;
    }
    h.send(text(PEER, "done", "selesai")).await;
    h.send(text(PEER, "name", "scan")).await;

    let docs = h.outbound.documents();
    assert_eq!(docs.len(), 1);
    let (_, _, quoted, _, bytes) = document(&docs[0]);
    assert_eq!(quoted, Some("m4"));
    let expected: Vec<(i64, i64)> = sizes
        .iter()
        .map(|&(w, hgt)| (i64::from(w), i64::from(hgt)))
        .collect();
    assert_eq!(page_sizes(bytes), expected);
}

#[tokio::test]
async fn concurrent_handles_keep_call_order() {
    let h = Harness::new();
    let first = h.image(PEER, "img1", png(3, 4));
    let second = h.image(PEER, "img2", png(5, 6));
    h.fetcher.delay(&format!("media-{PEER}-img1"), Duration::from_millis(100));

    tokio::join!(h.send(first), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.send(second).await;
    });

    let session = h.store.snapshot(&ConversationId::new(PEER)).await.unwrap();
    assert_eq!(session.image_count(), 2);
    assert_eq!(session.anchor().map(MessageId::as_str), Some("img2"));

    h.send(text(PEER, "done", "selesai")).await;
    h.send(text(PEER, "name", "urut")).await;
    let docs = h.outbound.documents();
    assert_eq!(docs.len(), 1);
    let (_, _, quoted, _, bytes) = document(&docs[0]);
    assert_eq!(quoted, Some("img2"));
    assert_eq!(page_sizes(bytes), vec![(3, 4), (5, 6)]);
}

#[tokio::test]
async fn completion_without_images_is_silent() {
    let h = Harness::new();
    h.send(text(PEER, "t1", "selesai")).await;
    assert!(h.outbound.sent().is_empty());
    assert_eq!(h.phase(PEER).await, Some(Phase::Idle));
}

#[tokio::test]
async fn repeated_completion_asks_again() {
    let h = Harness::new();
    h.send(h.image(PEER, "img1", png(4, 4))).await;
    h.send(text(PEER, "t1", "selesai")).await;
    h.send(text(PEER, "t2", "SELESAI ")).await;

    let texts = h.outbound.texts();
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[1], texts[2]);
    assert!(h.outbound.documents().is_empty());
    assert_eq!(h.phase(PEER).await, Some(Phase::AwaitingFileName));
}

#[tokio::test]
async fn hostile_name_is_sanitized() {
    let h = Harness::new();
    h.send(h.image(PEER, "img1", png(4, 4))).await;
    h.send(text(PEER, "t1", "selesai")).await;
    h.send(text(PEER, "t2", "../../etc/passwd")).await;

    let docs = h.outbound.documents();
    let (file_name, _, _, path, _) = document(&docs[0]);
    assert_eq!(file_name, "etcpasswd.pdf");
    assert!(path.starts_with(&h.temp_dir));
    assert_eq!(h.leftover_artifacts(), 0);
}

#[tokio::test]
async fn unusable_name_falls_back_to_generated() {
    let h = Harness::new();
    h.send(h.image(PEER, "img1", png(4, 4))).await;
    h.send(text(PEER, "t1", "selesai")).await;
    h.send(text(PEER, "t2", "???")).await;

    let docs = h.outbound.documents();
    let (file_name, ..) = document(&docs[0]);
    let stamp = file_name
        .strip_prefix("gambar-")
        .and_then(|rest| rest.strip_suffix(".pdf"))
        .unwrap();
    assert!(stamp.parse::<u64>().is_ok(), "{file_name}");
}

#[tokio::test]
async fn undecodable_image_fails_whole_cycle() {
    let h = Harness::new();
    h.send(h.image(PEER, "img1", png(4, 4))).await;
    h.send(h.image(PEER, "img2", Bytes::from_static(b"definitely not an image")))
        .await;
    h.send(text(PEER, "t1", "selesai")).await;
    h.send(text(PEER, "t2", "broken")).await;

    assert!(h.outbound.documents().is_empty());
    let texts = h.outbound.texts();
    let failures: Vec<_> = texts.iter().filter(|t| t.starts_with("❌")).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("image 2"), "{}", failures[0]);
    assert_eq!(h.phase(PEER).await, Some(Phase::Idle));
    assert_eq!(h.leftover_artifacts(), 0);
}

#[tokio::test]
async fn delivery_failure_resets_and_cleans_up() {
    let h = Harness::new();
    h.outbound.fail_documents.store(true, Ordering::SeqCst);
    h.send(h.image(PEER, "img1", png(4, 4))).await;
    h.send(text(PEER, "t1", "selesai")).await;
    h.send(text(PEER, "t2", "report")).await;

    let docs = h.outbound.documents();
    let (_, _, _, path, _) = document(&docs[0]);
    assert!(!path.exists());
    assert_eq!(h.leftover_artifacts(), 0);

    let last = h.outbound.texts().pop().unwrap();
    assert!(last.contains("peer unreachable"), "{last}");
    assert_eq!(h.phase(PEER).await, Some(Phase::Idle));

    // The next batch starts from scratch.
    h.outbound.fail_documents.store(false, Ordering::SeqCst);
    h.send(h.image(PEER, "img2", png(8, 8))).await;
    h.send(text(PEER, "t3", "selesai")).await;
    h.send(text(PEER, "t4", "again")).await;
    let docs = h.outbound.documents();
    let (_, _, quoted, _, bytes) = document(&docs[1]);
    assert_eq!(quoted, Some("img2"));
    assert_eq!(page_sizes(bytes), vec![(8, 8)]);
}

#[tokio::test]
async fn failed_fetch_keeps_the_batch() {
    let h = Harness::new();
    h.send(h.image(PEER, "img1", png(4, 6))).await;
    h.send(image_message(PEER, "img2", "missing")).await;

    let last = h.outbound.sent().pop().unwrap();
    assert!(matches!(&last, Sent::Text { text, .. } if text == "Gagal memproses gambar."));
    let snapshot = h.store.snapshot(&ConversationId::new(PEER)).await.unwrap();
    assert_eq!(snapshot.phase(), Phase::CollectingImages);
    assert_eq!(snapshot.image_count(), 1);
    assert_eq!(snapshot.anchor().unwrap().as_str(), "img1");

    h.send(text(PEER, "t1", "selesai")).await;
    h.send(text(PEER, "t2", "partial")).await;
    let docs = h.outbound.documents();
    let (_, _, quoted, _, bytes) = document(&docs[0]);
    assert_eq!(quoted, Some("img1"));
    assert_eq!(page_sizes(bytes), vec![(4, 6)]);
}

#[tokio::test]
async fn greeting_answers_without_touching_state() {
    let h = Harness::new();
    h.send(text(PEER, "t0", "Halo")).await;
    assert_eq!(h.phase(PEER).await, Some(Phase::Idle));

    h.send(h.image(PEER, "img1", png(4, 4))).await;
    h.send(text(PEER, "t1", " halo ")).await;
    assert_eq!(h.phase(PEER).await, Some(Phase::CollectingImages));

    let texts = h.outbound.texts();
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[0], texts[2]);
    assert!(texts[0].contains("*selesai*"));
}

#[tokio::test]
async fn image_while_awaiting_name_extends_batch() {
    let h = Harness::new();
    h.send(h.image(PEER, "img1", png(4, 4))).await;
    h.send(text(PEER, "t1", "selesai")).await;
    h.send(h.image(PEER, "img2", png(5, 5))).await;
    assert_eq!(h.phase(PEER).await, Some(Phase::CollectingImages));

    h.send(text(PEER, "t2", "selesai")).await;
    h.send(text(PEER, "t3", "both")).await;
    let docs = h.outbound.documents();
    let (_, _, quoted, _, bytes) = document(&docs[0]);
    assert_eq!(quoted, Some("img2"));
    assert_eq!(page_sizes(bytes), vec![(4, 4), (5, 5)]);
}

#[tokio::test]
async fn batch_cap_drops_extra_images() {
    let mut config = LembarConfig::default();
    config.bot.max_images = Some(1);
    let h = Harness::with_config(config);

    h.send(h.image(PEER, "img1", png(4, 4))).await;
    h.send(h.image(PEER, "img2", png(5, 5))).await;
    let last = h.outbound.texts().pop().unwrap();
    assert!(last.contains("Maksimal 1"), "{last}");

    h.send(text(PEER, "t1", "selesai")).await;
    h.send(text(PEER, "t2", "capped")).await;
    let docs = h.outbound.documents();
    let (_, _, _, _, bytes) = document(&docs[0]);
    assert_eq!(page_sizes(bytes), vec![(4, 4)]);
}

// ── Dispatcher ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn conversations_do_not_interfere() {
    let h = Harness::new();
    let alice = "alice@s.whatsapp.net";
    let bob = "bob@s.whatsapp.net";

    let a1 = h.image(alice, "a1", png(10, 10));
    let a2 = h.image(alice, "a2", png(20, 20));
    let b1 = h.image(bob, "b1", png(5, 5));
    let b2 = h.image(bob, "b2", png(6, 6));
    let b3 = h.image(bob, "b3", png(7, 7));
    // Alice's first download is slow; her later messages must still wait for it.
    h.fetcher.delay(&format!("media-{alice}-a1"), Duration::from_millis(150));

    let (tx, rx) = event_channel(64);
    let dispatcher = tokio::spawn(Dispatcher::new(Arc::clone(&h.engine)).run(rx));

    let events = vec![
        a1,
        b1,
        a2,
        b2,
        text(alice, "at1", "selesai"),
        b3,
        text(bob, "bt1", "selesai"),
        text(alice, "at2", "Alice"),
        text(bob, "bt2", "Bob"),
    ];
    for message in events {
        tx.send(ChannelEvent::Message(message)).await.unwrap();
    }
    drop(tx);
    dispatcher.await.unwrap().unwrap();

    for (peer, name, sizes, anchor) in [
        (alice, "Alice.pdf", vec![(10, 10), (20, 20)], "a2"),
        (bob, "Bob.pdf", vec![(5, 5), (6, 6), (7, 7)], "b3"),
    ] {
        let sent = h.outbound.sent_to(peer);
        let docs: Vec<_> = sent
            .iter()
            .filter(|s| matches!(s, Sent::Document { .. }))
            .collect();
        assert_eq!(docs.len(), 1, "{peer}: {sent:#?}");
        let (file_name, _, quoted, _, bytes) = document(docs[0]);
        assert_eq!(file_name, name);
        assert_eq!(quoted, Some(anchor));
        assert_eq!(page_sizes(bytes), sizes);

        let counts: Vec<_> = sent
            .iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } if text.starts_with("📸") => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(counts.len(), sizes.len());
        for (i, ack) in counts.iter().enumerate() {
            assert!(ack.contains(&format!("({})", i + 1)), "{ack}");
        }
        assert_eq!(h.phase(peer).await, Some(Phase::Idle));
    }
    assert_eq!(h.leftover_artifacts(), 0);
}

#[tokio::test]
async fn logged_out_stops_the_dispatcher() {
    let h = Harness::new();
    let (tx, rx) = event_channel(8);
    let dispatcher = tokio::spawn(Dispatcher::new(Arc::clone(&h.engine)).run(rx));

    tx.send(ChannelEvent::QrCode {
        account_id: "default".into(),
        qr: "2@abc".into(),
    })
    .await
    .unwrap();
    tx.send(ChannelEvent::Disconnected {
        account_id: "default".into(),
        reason: "stream closed".into(),
    })
    .await
    .unwrap();
    tx.send(ChannelEvent::LoggedOut {
        account_id: "default".into(),
        reason: "device removed".into(),
    })
    .await
    .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), dispatcher)
        .await
        .unwrap()
        .unwrap();
    match result {
        Err(Error::LoggedOut { account_id, reason }) => {
            assert_eq!(account_id, "default");
            assert_eq!(reason, "device removed");
        },
        other => panic!("expected logged out, got {other:?}"),
    }
    // The sender is still alive; the dispatcher stopped on its own.
    assert!(tx.is_closed());
}
