pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum ModelError {
        #[error("attribute path must contain at least one attribute name")]
        EmptyAttributePath,
        #[error("attribute name at position {0} is blank")]
        BlankAttributeName(usize),
        #[error("node with id {0} not found")]
        NodeNotFound(usize),
        #[error("node with id {0} is not an element")]
        NotAnElement(usize),
    }
}

pub mod xml {
    use crate::errors::ModelError;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct NodeId(usize);

    impl NodeId {
        #[inline]
        pub fn new(raw: usize) -> Self {
            Self(raw)
        }

        /// 提供原始下标，便于日志输出。
        #[inline]
        pub fn get(self) -> usize {
            self.0
        }
    }

    /// 元素属性，`value` 为已解码的文本。
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct XmlAttribute {
        pub name: String,
        pub value: String,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct XmlElement {
        /// 限定名，例如 `kml:Placemark`。
        pub name: String,
        /// 标签名之后的原始属性文本（含空白），序列化时原样写回。
        pub raw_attributes: String,
        pub attributes: Vec<XmlAttribute>,
        pub self_closing: bool,
        pub children: Vec<NodeId>,
        /// 源文件中的结束标签原文（如 `</kml >`）；为 `None` 时按名称生成。
        pub raw_end: Option<String>,
    }

    impl XmlElement {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                raw_attributes: String::new(),
                attributes: Vec::new(),
                self_closing: false,
                children: Vec::new(),
                raw_end: None,
            }
        }

        /// 去掉命名空间前缀后的名称。
        #[inline]
        pub fn local_name(&self) -> &str {
            match self.name.rsplit_once(':') {
                Some((_, local)) => local,
                None => &self.name,
            }
        }

        /// 返回第一个同名属性的值。
        pub fn attribute(&self, name: &str) -> Option<&str> {
            self.attributes
                .iter()
                .find(|attr| attr.name == name)
                .map(|attr| attr.value.as_str())
        }
    }

    /// 文本节点。`raw` 保存源文件中的转义形式；程序写入的文本没有 `raw`，序列化时再转义。
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct XmlText {
        pub value: String,
        pub raw: Option<String>,
    }

    impl XmlText {
        pub fn new(value: impl Into<String>) -> Self {
            Self {
                value: value.into(),
                raw: None,
            }
        }

        pub fn parsed(value: impl Into<String>, raw: impl Into<String>) -> Self {
            Self {
                value: value.into(),
                raw: Some(raw.into()),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum XmlNode {
        Element(XmlElement),
        Text(XmlText),
        CData(String),
        Comment(String),
        Declaration(String),
        ProcessingInstruction(String),
        /// 完整的 `<!DOCTYPE ...>` 原文。
        DocType(String),
    }

    /// 以节点仓库（arena）形式持有整棵 XML 树，所有节点归文档所有。
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct XmlDocument {
        nodes: Vec<XmlNode>,
        top_level: Vec<NodeId>,
    }

    impl XmlDocument {
        pub fn new() -> Self {
            Self::default()
        }

        /// 分配一个尚未挂接的节点。
        pub fn alloc(&mut self, node: XmlNode) -> NodeId {
            let id = NodeId::new(self.nodes.len());
            self.nodes.push(node);
            id
        }

        pub fn push_top_level(&mut self, id: NodeId) -> Result<(), ModelError> {
            self.ensure_exists(id)?;
            self.top_level.push(id);
            Ok(())
        }

        pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
            self.ensure_exists(child)?;
            let element = self.element_mut(parent)?;
            element.children.push(child);
            element.self_closing = false;
            Ok(())
        }

        #[inline]
        pub fn top_level(&self) -> impl Iterator<Item = NodeId> + '_ {
            self.top_level.iter().copied()
        }

        #[inline]
        pub fn node(&self, id: NodeId) -> Option<&XmlNode> {
            self.nodes.get(id.get())
        }

        #[inline]
        pub fn node_mut(&mut self, id: NodeId) -> Option<&mut XmlNode> {
            self.nodes.get_mut(id.get())
        }

        pub fn element(&self, id: NodeId) -> Option<&XmlElement> {
            match self.node(id)? {
                XmlNode::Element(element) => Some(element),
                _ => None,
            }
        }

        pub fn element_mut(&mut self, id: NodeId) -> Result<&mut XmlElement, ModelError> {
            match self.nodes.get_mut(id.get()) {
                Some(XmlNode::Element(element)) => Ok(element),
                Some(_) => Err(ModelError::NotAnElement(id.get())),
                None => Err(ModelError::NodeNotFound(id.get())),
            }
        }

        /// 文档根元素（第一个顶层元素）。
        pub fn root_element(&self) -> Option<NodeId> {
            self.top_level()
                .find(|id| matches!(self.node(*id), Some(XmlNode::Element(_))))
        }

        /// 以文档顺序（先序）遍历 `id` 的所有后代，不含 `id` 本身。
        pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
            let mut stack = Vec::new();
            if let Some(element) = self.element(id) {
                stack.extend(element.children.iter().rev().copied());
            }
            Descendants {
                document: self,
                stack,
            }
        }

        /// 以文档顺序返回全部本地名为 `local_name` 的元素。
        pub fn elements_by_local_name(&self, local_name: &str) -> Vec<NodeId> {
            let mut found = Vec::new();
            for top in self.top_level() {
                let candidates = std::iter::once(top).chain(self.descendants(top));
                for id in candidates {
                    if let Some(element) = self.element(id) {
                        if element.local_name() == local_name {
                            found.push(id);
                        }
                    }
                }
            }
            found
        }

        /// 拼接元素下所有文本与 CDATA，忽略注释，语义同 DOM `textContent`。
        pub fn text_content(&self, id: NodeId) -> String {
            let mut content = String::new();
            match self.node(id) {
                Some(XmlNode::Text(text)) => content.push_str(&text.value),
                Some(XmlNode::CData(data)) => content.push_str(data),
                Some(XmlNode::Element(_)) => {
                    for descendant in self.descendants(id) {
                        match self.node(descendant) {
                            Some(XmlNode::Text(text)) => content.push_str(&text.value),
                            Some(XmlNode::CData(data)) => content.push_str(data),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
            content
        }

        /// 用单个文本节点替换元素的全部子节点。被替换的子节点留在仓库中但不再可达。
        pub fn set_text_content(
            &mut self,
            id: NodeId,
            value: impl Into<String>,
        ) -> Result<(), ModelError> {
            self.element_mut(id)?;
            let text = self.alloc(XmlNode::Text(XmlText::new(value)));
            let element = self.element_mut(id)?;
            element.children.clear();
            element.children.push(text);
            element.self_closing = false;
            Ok(())
        }

        fn ensure_exists(&self, id: NodeId) -> Result<(), ModelError> {
            if id.get() < self.nodes.len() {
                Ok(())
            } else {
                Err(ModelError::NodeNotFound(id.get()))
            }
        }
    }

    pub struct Descendants<'a> {
        document: &'a XmlDocument,
        stack: Vec<NodeId>,
    }

    impl Iterator for Descendants<'_> {
        type Item = NodeId;

        fn next(&mut self) -> Option<Self::Item> {
            let id = self.stack.pop()?;
            if let Some(element) = self.document.element(id) {
                self.stack.extend(element.children.iter().rev().copied());
            }
            Some(id)
        }
    }
}

pub mod placemark {
    use std::collections::HashMap;
    use std::fmt;

    use serde::Serialize;

    use crate::errors::ModelError;
    use crate::xml::{NodeId, XmlDocument};

    /// KML 中承载单个地物的元素名。
    pub const PLACEMARK_TAG: &str = "Placemark";
    /// 按 `name` 属性存放字段值的元素名。
    pub const DATA_FIELD_TAG: &str = "SimpleData";
    pub const GROUP_KEY_DELIMITER: &str = "|";

    /// 分组所用的属性名序列，最后一个为需要去重的叶属性。
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct AttributePath(Vec<String>);

    impl AttributePath {
        pub fn new<I, S>(names: I) -> Result<Self, ModelError>
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let names: Vec<String> = names.into_iter().map(Into::into).collect();
            if names.is_empty() {
                return Err(ModelError::EmptyAttributePath);
            }
            if let Some(position) = names.iter().position(|name| name.trim().is_empty()) {
                return Err(ModelError::BlankAttributeName(position));
            }
            Ok(Self(names))
        }

        #[inline]
        pub fn names(&self) -> &[String] {
            &self.0
        }

        #[inline]
        pub fn leaf(&self) -> &str {
            // 构造时保证非空
            &self.0[self.0.len() - 1]
        }
    }

    #[derive(Debug, Clone)]
    pub struct IndexedField {
        pub node: NodeId,
        pub value: String,
    }

    /// 单个 placemark 的字段索引：字段名 → 第一个同名数据字段。
    #[derive(Debug, Clone, Default)]
    pub struct FieldIndex {
        fields: HashMap<String, IndexedField>,
    }

    impl FieldIndex {
        pub fn build(document: &XmlDocument, placemark: NodeId) -> Self {
            let mut fields: HashMap<String, IndexedField> = HashMap::new();
            for id in document.descendants(placemark) {
                let Some(element) = document.element(id) else {
                    continue;
                };
                if element.local_name() != DATA_FIELD_TAG {
                    continue;
                }
                let Some(name) = element.attribute("name") else {
                    continue;
                };
                if fields.contains_key(name) {
                    continue;
                }
                fields.insert(
                    name.to_string(),
                    IndexedField {
                        node: id,
                        value: document.text_content(id),
                    },
                );
            }
            Self { fields }
        }

        #[inline]
        pub fn field(&self, name: &str) -> Option<&IndexedField> {
            self.fields.get(name)
        }

        /// 去除首尾空白后的值；字段缺失或为空白时返回 `None`。
        pub fn trimmed(&self, name: &str) -> Option<&str> {
            let value = self.fields.get(name)?.value.trim();
            if value.is_empty() { None } else { Some(value) }
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.fields.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.fields.is_empty()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
    #[serde(transparent)]
    pub struct GroupKey(String);

    impl std::borrow::Borrow<str> for GroupKey {
        fn borrow(&self) -> &str {
            &self.0
        }
    }

    impl GroupKey {
        /// 按路径顺序拼接各字段值；任一字段缺失或为空白时返回 `None`。
        pub fn build(path: &AttributePath, index: &FieldIndex) -> Option<Self> {
            let mut values = Vec::with_capacity(path.names().len());
            for name in path.names() {
                values.push(index.trimmed(name)?);
            }
            Some(Self(values.join(GROUP_KEY_DELIMITER)))
        }

        #[inline]
        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl From<&str> for GroupKey {
        fn from(value: &str) -> Self {
            Self(value.to_string())
        }
    }

    impl fmt::Display for GroupKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// 扫描阶段产生的记录，只引用叶字段节点，不持有节点。
    #[derive(Debug, Clone)]
    pub struct PlacemarkRecord {
        pub placemark: NodeId,
        pub leaf_field: NodeId,
        pub leaf_value: String,
        pub key: GroupKey,
    }
}

pub mod report {
    use std::collections::HashMap;

    use serde::ser::{Serialize, SerializeMap, Serializer};

    use crate::placemark::GroupKey;

    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
    pub struct DuplicateEntry {
        pub name: String,
        pub count: usize,
        pub corrected: Vec<String>,
    }

    /// 分组键 → 重复条目。保持分组首次出现的顺序，序列化为 JSON 对象。
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct DuplicatesReport {
        groups: Vec<(GroupKey, Vec<DuplicateEntry>)>,
        positions: HashMap<GroupKey, usize>,
    }

    impl DuplicatesReport {
        pub fn new() -> Self {
            Self::default()
        }

        /// 写入分组条目，已存在的分组会被替换。
        pub fn insert(&mut self, key: GroupKey, entries: Vec<DuplicateEntry>) {
            match self.positions.get(&key) {
                Some(&position) => self.groups[position].1 = entries,
                None => {
                    self.positions.insert(key.clone(), self.groups.len());
                    self.groups.push((key, entries));
                }
            }
        }

        pub fn get(&self, key: &str) -> Option<&[DuplicateEntry]> {
            let position = *self.positions.get(key)?;
            Some(self.groups[position].1.as_slice())
        }

        pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &[DuplicateEntry])> {
            self.groups
                .iter()
                .map(|(key, entries)| (key, entries.as_slice()))
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.groups.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.groups.is_empty()
        }

        /// 不同的（分组, 名称）重复对数量，而非被改名的节点数。
        pub fn total_duplicates(&self) -> usize {
            self.groups.iter().map(|(_, entries)| entries.len()).sum()
        }

        pub fn renamed_count(&self) -> usize {
            self.groups
                .iter()
                .flat_map(|(_, entries)| entries.iter())
                .map(|entry| entry.corrected.len())
                .sum()
        }
    }

    impl Serialize for DuplicatesReport {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(self.groups.len()))?;
            for (key, entries) in &self.groups {
                map.serialize_entry(key, entries)?;
            }
            map.end()
        }
    }
}
