//! Config schema types.
use std::path::PathBuf;

use {
    lembar_common::RasterFormat,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LembarConfig {
    pub bot: BotConfig,
    pub messages: MessagesConfig,
    pub document: DocumentConfig,
    pub whatsapp: WhatsAppSection,
}

/// Command keywords and batch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Finishes the current batch (compared trimmed, case-insensitive).
    pub completion_keyword: String,
    /// Replies with usage instructions.
    pub greeting_keyword: String,
    /// Prefix of the generated name used when the user's name sanitizes to nothing.
    pub fallback_name_prefix: String,
    /// Maximum images per batch. Unset means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_images: Option<usize>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            completion_keyword: "selesai".into(),
            greeting_keyword: "halo".into(),
            fallback_name_prefix: "gambar".into(),
            max_images: None,
        }
    }
}

/// Reply templates.
///
/// Placeholders: `{count}`, `{keyword}`, `{file_name}`, `{error}`, `{limit}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    pub greeting: String,
    pub image_received: String,
    pub image_failed: String,
    pub batch_full: String,
    pub ask_file_name: String,
    pub working: String,
    pub success: String,
    pub failure: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            greeting: "Halo! Kirim beberapa gambar ke saya, lalu ketik *{keyword}* untuk \
                       mengubahnya menjadi PDF. Setelah itu, kirim nama file PDF-nya."
                .into(),
            image_received: "📸 Gambar diterima ({count}). Kirim lagi atau ketik *{keyword}* \
                             untuk buat PDF."
                .into(),
            image_failed: "Gagal memproses gambar.".into(),
            batch_full: "Maksimal {limit} gambar per PDF. Ketik *{keyword}* untuk lanjut.".into(),
            ask_file_name: "📄 Sekarang kirimkan *nama file PDF* (tanpa \"nama:\" ya).".into(),
            working: "⏳ Membuat PDF dari {count} gambar. Harap tunggu sebentar...".into(),
            success: "✅ PDF \"{file_name}\" berhasil dibuat dan dikirim!".into(),
            failure: "❌ Gagal membuat PDF: {error}".into(),
        }
    }
}

/// Document assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Raster formats to try, in priority order.
    pub decoders: Vec<RasterFormat>,
    /// Where artifacts are staged before delivery. Defaults to `<tmp>/lembar`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            decoders: RasterFormat::DEFAULT_ORDER.to_vec(),
            temp_dir: None,
        }
    }
}

impl DocumentConfig {
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("lembar"))
    }
}

/// WhatsApp Web transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppSection {
    pub account_id: String,
    /// Port of the sidecar WebSocket bridge.
    pub sidecar_port: u16,
    /// Directory with the sidecar's `package.json`. Searched when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_dir: Option<PathBuf>,
    /// Where the sidecar keeps login credentials.
    pub auth_dir: PathBuf,
    /// Spawn and supervise the sidecar process.
    pub auto_start_sidecar: bool,
    /// Allowed senders; empty allows everyone.
    pub allowlist: Vec<String>,
}

impl Default for WhatsAppSection {
    fn default() -> Self {
        Self {
            account_id: "default".into(),
            sidecar_port: 3710,
            sidecar_dir: None,
            auth_dir: PathBuf::from("sessions"),
            auto_start_sidecar: true,
            allowlist: Vec::new(),
        }
    }
}
