//! User-facing reply texts rendered from configured templates.

use lembar_config::MessagesConfig;

#[derive(Debug, Clone)]
pub struct Replies {
    messages: MessagesConfig,
    keyword: String,
}

impl Replies {
    /// `keyword` fills the `{keyword}` placeholder (the completion keyword).
    pub fn new(messages: MessagesConfig, keyword: impl Into<String>) -> Self {
        Self {
            messages,
            keyword: keyword.into(),
        }
    }

    pub fn greeting(&self) -> String {
        self.render(&self.messages.greeting, &[])
    }

    pub fn image_received(&self, count: usize) -> String {
        self.render(&self.messages.image_received, &[("count", count.to_string())])
    }

    pub fn image_failed(&self, error: &dyn std::fmt::Display) -> String {
        self.render(&self.messages.image_failed, &[("error", error.to_string())])
    }

    pub fn batch_full(&self, limit: usize) -> String {
        self.render(&self.messages.batch_full, &[("limit", limit.to_string())])
    }

    pub fn ask_file_name(&self) -> String {
        self.render(&self.messages.ask_file_name, &[])
    }

    pub fn working(&self, count: usize) -> String {
        self.render(&self.messages.working, &[("count", count.to_string())])
    }

    pub fn success(&self, file_name: &str) -> String {
        self.render(&self.messages.success, &[("file_name", file_name.to_string())])
    }

    pub fn failure(&self, error: &dyn std::fmt::Display) -> String {
        self.render(&self.messages.failure, &[("error", error.to_string())])
    }

    fn render(&self, template: &str, vars: &[(&str, String)]) -> String {
        let mut out = template.replace("{keyword}", &self.keyword);
        for (name, value) in vars {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_templates_fill_placeholders() {
        let replies = Replies::new(MessagesConfig::default(), "selesai");
        assert_eq!(
            replies.image_received(3),
            "📸 Gambar diterima (3). Kirim lagi atau ketik *selesai* untuk buat PDF."
        );
        assert_eq!(
            replies.success("Vacation Photos.pdf"),
            "✅ PDF \"Vacation Photos.pdf\" berhasil dibuat dan dikirim!"
        );
        assert_eq!(
            replies.failure(&"image 2 is not a readable jpeg file"),
            "❌ Gagal membuat PDF: image 2 is not a readable jpeg file"
        );
        assert!(replies.greeting().contains("*selesai*"));
        assert!(replies.working(2).contains("2 gambar"));
    }

    #[test]
    fn custom_templates() {
        let messages = MessagesConfig {
            image_failed: "could not read image: {error}".into(),
            batch_full: "{limit} max, type {keyword}".into(),
            ..Default::default()
        };
        let replies = Replies::new(messages, "done");
        assert_eq!(replies.image_failed(&"timeout"), "could not read image: timeout");
        assert_eq!(replies.batch_full(5), "5 max, type done");
    }
}
