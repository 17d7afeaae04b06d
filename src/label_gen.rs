use std::collections::HashMap;

pub struct LabelGenerator {
    label_map: HashMap<String, usize>,
}
impl LabelGenerator {
    pub fn new() -> Self {
        LabelGenerator {
            label_map: HashMap::new(),
        }
    }

    pub fn get_label(&mut self, name: &str) -> String {
        let count = self.label_map.entry(name.to_string()).or_insert(0);
        *count += 1;
        format!("%{}_{}", name, count)
    }

    /// Block names only need to be unique within one function.
    pub fn reset(&mut self) {
        self.label_map.clear();
    }
}

impl Default for LabelGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_count_per_name() {
        let mut gen = LabelGenerator::new();
        assert_eq!(gen.get_label("then"), "%then_1");
        assert_eq!(gen.get_label("then"), "%then_2");
        assert_eq!(gen.get_label("end"), "%end_1");
        gen.reset();
        assert_eq!(gen.get_label("then"), "%then_1");
    }
}
