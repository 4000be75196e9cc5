// src/ingest/categorize.rs
//! First-match keyword categorization against a fixed, ordered table.

use crate::listing::RawListing;

pub const DEFAULT_CATEGORY: &str = "Other";

/// Ordered (category, keywords) table. Earlier rows win.
pub const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Web Development",
        &[
            "web development",
            "web developer",
            "frontend",
            "front-end",
            "front end",
            "backend",
            "back-end",
            "full stack",
            "fullstack",
            "react",
            "angular",
            " vue",
            "node.js",
            "nodejs",
            "javascript",
            "typescript",
            "html",
            "css",
            "django",
            "php",
        ],
    ),
    (
        "Mobile Development",
        &[
            "android",
            " ios ",
            "flutter",
            "react native",
            "kotlin",
            "swift",
            "mobile app",
        ],
    ),
    (
        "Data Science",
        &[
            "data science",
            "data scientist",
            "data analyst",
            "data analysis",
            "data analytics",
            "analytics",
            "sql",
            "tableau",
            "power bi",
            "statistics",
        ],
    ),
    (
        "Machine Learning",
        &[
            "machine learning",
            "deep learning",
            "artificial intelligence",
            "nlp",
            "computer vision",
            "tensorflow",
            "pytorch",
            " ai ",
            "ml engineer",
        ],
    ),
    (
        "Design",
        &[
            "ui/ux",
            " ux ",
            "ui designer",
            "graphic design",
            "product design",
            "figma",
            "illustrator",
            "photoshop",
        ],
    ),
    (
        "Marketing",
        &[
            "marketing",
            " seo ",
            "social media",
            "growth",
            "brand",
            "advertising",
        ],
    ),
    (
        "Finance",
        &[
            "finance",
            "financial",
            "accounting",
            "accountant",
            "investment",
            "banking",
            "audit",
            "equity research",
        ],
    ),
    (
        "Content Writing",
        &[
            "content writing",
            "content writer",
            "copywriting",
            "copywriter",
            "blog",
            "editor",
            "journalism",
        ],
    ),
    (
        "Human Resources",
        &["human resources", " hr ", "recruitment", "recruiter", "talent acquisition"],
    ),
    (
        "Operations",
        &["operations", "supply chain", "logistics", "business development", "sales"],
    ),
    (
        "Software Development",
        &[
            "software",
            "developer",
            "programming",
            "java",
            "python",
            "c++",
            "golang",
            " rust ",
            "devops",
            "cloud",
        ],
    ),
];

/// Category for a listing: the table is scanned in order and, per row, the title is
/// checked before the description and skills. Keywords match case-insensitively as
/// substrings of the space-padded text.
pub fn categorize(listing: &RawListing) -> &'static str {
    let title = pad(&listing.title);
    let description = pad(&listing.description);
    let skills = pad(&listing.requirements.skills.join(" "));
    categorize_texts(&[&title, &description, &skills])
}

pub fn categorize_text(text: &str) -> &'static str {
    categorize_texts(&[&pad(text)])
}

fn categorize_texts(texts: &[&str]) -> &'static str {
    for (category, keywords) in CATEGORY_KEYWORDS {
        for text in texts {
            if keywords.iter().any(|k| text.contains(*k)) {
                return *category;
            }
        }
    }
    DEFAULT_CATEGORY
}

fn pad(s: &str) -> String {
    format!(" {} ", s.to_lowercase())
}
