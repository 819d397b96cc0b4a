use lopdf::content::Content;
use lopdf::{Document, Object};
use tally_core::DecodeConfig;

use crate::decode::DecodeError;
use crate::token::{TextToken, TokenStream};

type Matrix = [f64; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Average glyph advance as a fraction of the font size. Only used to size
/// tokens; column assignment works off the start and centre of a token.
const GLYPH_WIDTH: f64 = 0.5;

/// TJ kerning beyond this (thousandths of an em) is treated as a word gap.
const TJ_SPACE_THRESHOLD: f64 = 250.0;

/// Loads a PDF, decrypting it first when the trailer asks for it, and returns
/// every shown string with its position.
pub fn extract_tokens(
    data: &[u8],
    password: Option<&str>,
    limits: &DecodeConfig,
) -> Result<TokenStream, DecodeError> {
    let doc = open(data, password)?;

    let pages = doc.get_pages();
    if pages.len() > limits.max_pages {
        return Err(DecodeError::LimitExceeded(format!(
            "{} pages, limit is {}",
            pages.len(),
            limits.max_pages
        )));
    }

    let mut tokens = Vec::new();
    for (page_number, page_id) in pages {
        let raw = doc
            .get_page_content(page_id)
            .map_err(|e| DecodeError::Extraction(format!("page {page_number}: {e}")))?;
        let content = Content::decode(&raw)
            .map_err(|e| DecodeError::Extraction(format!("page {page_number}: {e}")))?;

        let mut state = TextState::default();
        for op in &content.operations {
            if let Some(token) = state.apply(page_number, &op.operator, &op.operands) {
                tokens.push(token);
                if tokens.len() > limits.max_tokens {
                    return Err(DecodeError::LimitExceeded(format!(
                        "more than {} text tokens",
                        limits.max_tokens
                    )));
                }
            }
        }
    }

    tracing::debug!(tokens = tokens.len(), "extracted PDF text tokens");
    Ok(TokenStream::new(tokens))
}

fn open(data: &[u8], password: Option<&str>) -> Result<Document, DecodeError> {
    let declares_encryption = contains(data, b"/Encrypt");

    let mut doc = match Document::load_mem(data) {
        Ok(doc) => doc,
        Err(e) if declares_encryption && password.is_none() => {
            tracing::debug!(error = %e, "encrypted PDF did not load without a password");
            return Err(DecodeError::PasswordRequired);
        }
        Err(e) => {
            return Err(DecodeError::DecryptionFailed(format!(
                "unreadable PDF container: {e}"
            )))
        }
    };

    if doc.trailer.get(b"Encrypt").is_ok() {
        match password {
            // An empty user password still opens the file.
            None => doc.decrypt("").map_err(|_| DecodeError::PasswordRequired)?,
            Some(pw) => doc
                .decrypt(pw)
                .map_err(|e| DecodeError::DecryptionFailed(e.to_string()))?,
        }
    }

    Ok(doc)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn multiply(m1: &Matrix, m2: &Matrix) -> Matrix {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn translate(tx: f64, ty: f64) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn numbers<const N: usize>(operands: &[Object]) -> Option<[f64; N]> {
    if operands.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, obj) in out.iter_mut().zip(operands) {
        *slot = number(obj)?;
    }
    Some(out)
}

/// Text strings are either UTF-16BE with a byte-order mark or single-byte.
/// Single-byte text is read as Latin-1, which covers the standard fonts.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

struct TextState {
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font_size: f64,
    leading: f64,
    horizontal_scale: f64,
}

impl Default for TextState {
    fn default() -> Self {
        TextState {
            ctm: IDENTITY,
            ctm_stack: Vec::new(),
            tm: IDENTITY,
            tlm: IDENTITY,
            font_size: 10.0,
            leading: 0.0,
            horizontal_scale: 1.0,
        }
    }
}

impl TextState {
    fn apply(&mut self, page: u32, operator: &str, operands: &[Object]) -> Option<TextToken> {
        match operator {
            "q" => self.ctm_stack.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.ctm_stack.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => {
                let m: Matrix = numbers::<6>(operands)?;
                self.ctm = multiply(&m, &self.ctm);
            }
            "BT" => {
                self.tm = IDENTITY;
                self.tlm = IDENTITY;
            }
            "Tf" => self.font_size = number(operands.get(1)?)?,
            "TL" => self.leading = number(operands.first()?)?,
            "Tz" => self.horizontal_scale = number(operands.first()?)? / 100.0,
            "Td" => {
                let [tx, ty] = numbers::<2>(operands)?;
                self.move_line(tx, ty);
            }
            "TD" => {
                let [tx, ty] = numbers::<2>(operands)?;
                self.leading = -ty;
                self.move_line(tx, ty);
            }
            "Tm" => {
                let m: Matrix = numbers::<6>(operands)?;
                self.tm = m;
                self.tlm = m;
            }
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" => return self.show(page, &[operands.first()?.clone()]),
            "TJ" => match operands.first()? {
                Object::Array(items) => return self.show(page, items),
                _ => return None,
            },
            "'" => {
                self.move_line(0.0, -self.leading);
                return self.show(page, &[operands.first()?.clone()]);
            }
            "\"" => {
                self.move_line(0.0, -self.leading);
                return self.show(page, &[operands.get(2)?.clone()]);
            }
            _ => {}
        }
        None
    }

    fn move_line(&mut self, tx: f64, ty: f64) {
        self.tlm = multiply(&translate(tx, ty), &self.tlm);
        self.tm = self.tlm;
    }

    /// Emits one token for a Tj/TJ run and advances the text matrix past it.
    fn show(&mut self, page: u32, items: &[Object]) -> Option<TextToken> {
        let mut text = String::new();
        let mut advance = 0.0;
        let em = self.font_size * self.horizontal_scale;

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let piece = decode_pdf_string(bytes);
                    advance += piece.chars().count() as f64 * em * GLYPH_WIDTH;
                    text.push_str(&piece);
                }
                other => {
                    if let Some(kern) = number(other) {
                        advance -= kern / 1000.0 * em;
                        if kern <= -TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                            text.push(' ');
                        }
                    }
                }
            }
        }

        let origin = multiply(&self.tm, &self.ctm);
        self.tm = multiply(&translate(advance, 0.0), &self.tm);

        let text = text.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let scale_x = (origin[0] * origin[0] + origin[1] * origin[1]).sqrt();
        let scale_y = (origin[2] * origin[2] + origin[3] * origin[3]).sqrt();
        Some(TextToken {
            text,
            page,
            x: origin[4],
            y: origin[5],
            width: advance * scale_x,
            height: self.font_size * scale_y,
        })
    }
}

#[cfg(test)]
pub(crate) mod testpdf {
    use lopdf::content::{Content, Operation};
    use lopdf::encryption::{decrypt_object, get_encryption_key};
    use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};

    /// Password padding of the standard security handler.
    const PAD: [u8; 32] = [
        0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E,
        0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
    ];

    fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut s: Vec<u8> = (0..=255).collect();
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        let (mut i, mut j) = (0u8, 0u8);
        data.iter()
            .map(|b| {
                i = i.wrapping_add(1);
                j = j.wrapping_add(s[i as usize]);
                s.swap(i as usize, j as usize);
                b ^ s[s[i as usize].wrapping_add(s[j as usize]) as usize]
            })
            .collect()
    }

    /// Encrypts every stream with 40-bit RC4 (revision 2) under `password`.
    fn encrypt(doc: &mut Document, password: &str) {
        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => Object::Integer(1),
            "R" => Object::Integer(2),
            "O" => Object::string_literal(vec![0x11u8; 32]),
            "P" => Object::Integer(-4),
        });
        doc.trailer.set("Encrypt", encrypt_id);
        doc.trailer.set(
            "ID",
            vec![
                Object::string_literal(vec![0x33u8; 16]),
                Object::string_literal(vec![0x33u8; 16]),
            ],
        );

        let key = get_encryption_key(doc, password, false).unwrap();
        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(encrypt_id) {
            dict.set("U", Object::String(rc4(&key, &PAD), StringFormat::Hexadecimal));
        }

        // RC4 is its own inverse, so the decryption routine encrypts too.
        let ids: Vec<ObjectId> = doc.objects.keys().copied().filter(|id| *id != encrypt_id).collect();
        for id in ids {
            let Ok(cipher) = decrypt_object(&key, id, &doc.objects[&id]) else {
                continue;
            };
            match doc.objects.get_mut(&id) {
                Some(Object::Stream(stream)) => stream.set_content(cipher),
                Some(Object::String(content, _)) => *content = cipher,
                _ => {}
            }
        }
    }

    /// One line of text at an absolute position.
    #[derive(Clone)]
    pub struct Placed<'a> {
        pub x: f64,
        pub y: f64,
        pub text: &'a str,
    }

    /// Builds a PDF with one page per slice of placed strings, encrypted when
    /// a user password is given.
    pub fn build(pages: &[Vec<Placed<'_>>], password: Option<&str>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for placed in pages {
            let mut operations = vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(9)]),
            ];
            for p in placed {
                operations.push(Operation::new(
                    "Tm",
                    vec![
                        Object::Integer(1),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(1),
                        Object::Integer(p.x as i64),
                        Object::Integer(p.y as i64),
                    ],
                ));
                operations.push(Operation::new("Tj", vec![Object::string_literal(p.text)]));
            }
            operations.push(Operation::new("ET", vec![]));
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        if let Some(password) = password {
            encrypt(&mut doc, password);
        }

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }
}
