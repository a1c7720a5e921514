use crate::models::Article;

pub const REFUSAL_MESSAGE: &str = "Maaf, saya tidak memiliki informasi tentang itu.";

const RECORD_SEPARATOR: &str = "\n\n---\n\n";

/// `ARTIKEL <n>` block for one article, `n` being its 1-based position.
pub fn article_record(position: usize, article: &Article) -> String {
    format!(
        "ARTIKEL {position}:\nJUDUL: {}\nURL: {}\n\n{}",
        article.title, article.url, article.full_text
    )
}

pub fn build_news_context(articles: &[Article]) -> String {
    articles
        .iter()
        .enumerate()
        .map(|(idx, article)| article_record(idx + 1, article))
        .collect::<Vec<_>>()
        .join(RECORD_SEPARATOR)
}

pub fn build_system_prompt(news_context: &str) -> String {
    format!(
        "Anda adalah asisten AI yang membantu menjawab pertanyaan berdasarkan berita di Kompas.id.\n\n\
         Anda HANYA boleh menjawab pertanyaan berdasarkan informasi yang terdapat dalam konteks berita berikut:\n\n\
         {news_context}\n\n\
         Jika pertanyaan tidak terkait dengan informasi dalam konteks berita, jawablah \"{REFUSAL_MESSAGE}\"\n\n\
         PENTING:\n\
         1. Format jawaban Anda dalam Markdown yang rapi untuk meningkatkan keterbacaan.\n\
         2. Gunakan paragraf, poin-poin, dan penekanan (bold/italic) dengan tepat.\n\
         3. JANGAN menyertakan referensi seperti \"(ARTIKEL X)\" dalam jawaban Anda. Pengguna sudah dapat melihat sumber informasi di bagian terpisah.\n\
         4. Tetap gunakan informasi dari artikel yang relevan, tetapi jangan menyebutkan nomor artikelnya dalam teks jawaban.\n\
         5. Untuk keperluan internal sistem, tetap sertakan kode artikel yang Anda gunakan di AKHIR jawaban Anda dengan format: \"ARTIKEL 1 ARTIKEL 2\" (jika Anda menggunakan artikel 1 dan 2). Kode ini akan dihapus sebelum ditampilkan kepada pengguna.\n\n\
         Jawablah dalam Bahasa Indonesia yang baik dan benar."
    )
}
