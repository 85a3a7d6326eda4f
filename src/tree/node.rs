//! Tree node container

/// One payload plus its ordered, owned children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode<T> {
    pub data: T,
    pub children: Vec<TreeNode<T>>,
}

impl<T> TreeNode<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            children: Vec::new(),
        }
    }

    /// Append a child and return a handle to it for further attachment
    pub fn add_child(&mut self, child: TreeNode<T>) -> &mut TreeNode<T> {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn with_child(mut self, child: TreeNode<T>) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
