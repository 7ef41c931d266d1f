use std::fmt;
use std::str;

use kmlfix_core::xml::{NodeId, XmlAttribute, XmlDocument, XmlElement, XmlNode, XmlText};
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

#[derive(Debug)]
pub(crate) enum KmlError {
    Syntax { position: u64, message: String },
    Invalid { message: String },
}

impl KmlError {
    fn syntax(position: u64, message: impl fmt::Display) -> Self {
        Self::Syntax {
            position,
            message: message.to_string(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl fmt::Display for KmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KmlError::Syntax { position, message } => {
                write!(f, "XML 语法错误（偏移 {position}）: {message}")
            }
            KmlError::Invalid { message } => f.write_str(message),
        }
    }
}

/// 将 quick-xml 事件流构建为节点仓库，保留原始文本以便无损写回。
pub(crate) struct KmlParser<'a> {
    source: &'a str,
    reader: Reader<&'a [u8]>,
    document: XmlDocument,
    open: Vec<NodeId>,
}

impl<'a> KmlParser<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            source,
            reader: Reader::from_str(source),
            document: XmlDocument::new(),
            open: Vec::new(),
        }
    }

    pub(crate) fn parse(mut self) -> Result<XmlDocument, KmlError> {
        loop {
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(err) => {
                    return Err(KmlError::syntax(self.reader.error_position() as u64, err));
                }
            };
            let consumed = self.reader.buffer_position() as usize;
            match event {
                Event::Start(start) => {
                    let element = element_from_start(&start, false)?;
                    let id = self.attach(XmlNode::Element(element))?;
                    self.open.push(id);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start, true)?;
                    self.attach(XmlNode::Element(element))?;
                }
                Event::End(end) => {
                    let Some(closed) = self.open.pop() else {
                        return Err(KmlError::invalid(format!(
                            "多余的结束标签 </{}>",
                            utf8(end.name().as_ref())?
                        )));
                    };
                    // 结束标签内可能带空白，如 `</kml >`
                    let raw_end = self.source.get(..consumed).and_then(|head| {
                        head.rfind("</").map(|from| head[from..].to_string())
                    });
                    if let Ok(element) = self.document.element_mut(closed) {
                        element.raw_end = raw_end;
                    }
                }
                Event::Text(text) => {
                    let raw = utf8(&text)?;
                    let value = unescape(raw)
                        .map_err(|err| KmlError::invalid(format!("无法解码文本 \"{raw}\": {err}")))?
                        .into_owned();
                    self.push_text(value, raw)?;
                }
                Event::GeneralRef(reference) => {
                    let name = utf8(&reference)?;
                    let raw = format!("&{name};");
                    let value = match unescape(&raw) {
                        Ok(value) => value.into_owned(),
                        // 未声明的命名实体（如 HTML 的 `&nbsp;`）按原文保留
                        Err(err) if !name.starts_with('#') => {
                            warn!(entity = %raw, error = %err, "未知实体引用，按原文保留");
                            raw.clone()
                        }
                        Err(err) => {
                            return Err(KmlError::invalid(format!("无法解码字符引用 \"{raw}\": {err}")));
                        }
                    };
                    self.push_text(value, &raw)?;
                }
                Event::CData(data) => {
                    let data = utf8(&data)?.to_string();
                    self.attach(XmlNode::CData(data))?;
                }
                Event::Comment(comment) => {
                    let comment = utf8(&comment)?.to_string();
                    self.attach(XmlNode::Comment(comment))?;
                }
                Event::Decl(decl) => {
                    let decl = utf8(&decl)?.to_string();
                    self.attach(XmlNode::Declaration(decl))?;
                }
                Event::PI(pi) => {
                    let pi = utf8(&pi)?.to_string();
                    self.attach(XmlNode::ProcessingInstruction(pi))?;
                }
                Event::DocType(doctype) => {
                    let content = utf8(&doctype)?;
                    let markup = self.raw_doctype(content, consumed);
                    self.attach(XmlNode::DocType(markup))?;
                }
                Event::Eof => break,
            }
        }

        if let Some(unclosed) = self.open.last() {
            let name = self
                .document
                .element(*unclosed)
                .map(|element| element.name.clone())
                .unwrap_or_default();
            return Err(KmlError::invalid(format!("元素 <{name}> 未闭合")));
        }
        if self.document.root_element().is_none() {
            return Err(KmlError::invalid("文档缺少根元素"));
        }
        Ok(self.document)
    }

    fn attach(&mut self, node: XmlNode) -> Result<NodeId, KmlError> {
        let id = self.document.alloc(node);
        let linked = match self.open.last() {
            Some(parent) => self.document.append_child(*parent, id),
            None => self.document.push_top_level(id),
        };
        linked.map_err(|err| KmlError::invalid(err.to_string()))?;
        Ok(id)
    }

    /// 从源文本截取完整的 `<!DOCTYPE ...>`，保留关键字后的原始空白。
    fn raw_doctype(&self, content: &str, consumed: usize) -> String {
        let markup = consumed
            .checked_sub(content.len() + 1)
            .and_then(|content_start| self.source.get(..content_start))
            .and_then(|head| head.rfind("<!").map(|from| from..consumed))
            .and_then(|range| self.source.get(range));
        match markup {
            Some(markup) if markup.ends_with('>') => markup.to_string(),
            _ => format!("<!DOCTYPE {content}>"),
        }
    }

    /// 相邻的文本与实体引用合并为同一个文本节点。
    fn push_text(&mut self, value: String, raw: &str) -> Result<(), KmlError> {
        if let Some(last) = self.last_sibling() {
            if let Some(XmlNode::Text(XmlText {
                value: existing,
                raw: Some(existing_raw),
            })) = self.document.node_mut(last)
            {
                existing.push_str(&value);
                existing_raw.push_str(raw);
                return Ok(());
            }
        }
        self.attach(XmlNode::Text(XmlText::parsed(value, raw)))?;
        Ok(())
    }

    fn last_sibling(&self) -> Option<NodeId> {
        match self.open.last() {
            Some(parent) => self.document.element(*parent)?.children.last().copied(),
            None => self.document.top_level().last(),
        }
    }
}

fn element_from_start(start: &BytesStart<'_>, self_closing: bool) -> Result<XmlElement, KmlError> {
    let name = utf8(start.name().as_ref())?.to_string();
    let content = utf8(start)?;
    let raw_attributes = content.get(name.len()..).unwrap_or_default().to_string();

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| {
            KmlError::invalid(format!("元素 <{name}> 的属性无法解析: {err}"))
        })?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let raw_value = utf8(&attr.value)?;
        let value = unescape(raw_value).map_err(|err| {
            KmlError::invalid(format!("属性 {key} 的值 \"{raw_value}\" 无法解码: {err}"))
        })?;
        attributes.push(XmlAttribute {
            name: key,
            value: value.into_owned(),
        });
    }

    Ok(XmlElement {
        name,
        raw_attributes,
        attributes,
        self_closing,
        children: Vec::new(),
        raw_end: None,
    })
}

fn utf8(bytes: &[u8]) -> Result<&str, KmlError> {
    str::from_utf8(bytes).map_err(|err| KmlError::invalid(format!("非法 UTF-8 内容: {err}")))
}
