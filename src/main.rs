use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use rustyline::DefaultEditor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use filter_builder::envelope;
use filter_builder::row::RowContent;
use filter_builder::{
    Attribute, CollectionOperator, RowId, RowShape, RowTree, SchemaConfig, SchemaRegistry, Translator, Type,
};

const DEFAULT_SCHEMA_PATH: &str = "schema.json";

const HELP: &str = "\
Rows are addressed by the number shown by `show`.

  show                       list the rows
  expr                       print the expression tree
  cuq [CLASS]                show or change the class under qualification
  classes                    list the classes usable with `cuq`
  add ROW                    add an attribute row under ROW
  group ROW all|any|none     add a compound row under ROW
  choices ROW                list attributes selectable on ROW
  attr ROW NAME              set the childmost attribute of ROW
  at ROW INDEX NAME          set path element INDEX of ROW, dropping the rest
  coll ROW all|any|none|count
  op ROW OPERATOR            e.g. `op 1 >=` or `op 2 is true`
  val ROW [VALUE]            set (or clear) the value of ROW
  ptype ROW TYPE             int32, float64, utf8_string, date_time, boolean
  pname ROW NAME             set the property name of ROW
  rm ROW                     remove ROW and everything under it
  save FILE | load FILE      write or read a saved filter
  quit";

/// Load the schema catalog, falling back to the built-in one.
fn load_registry(path: Option<String>) -> anyhow::Result<SchemaRegistry> {
    let path = path.unwrap_or_else(|| DEFAULT_SCHEMA_PATH.to_string());
    let config = match SchemaConfig::from_json_file(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; using the built-in schema catalog", e);
            return builtin_registry();
        }
    };
    match SchemaRegistry::from_config(config) {
        Ok(registry) => {
            info!(path = %path, "loaded schema catalog");
            Ok(registry)
        }
        Err(e) => {
            warn!("{}: {}; using the built-in schema catalog", path, e);
            builtin_registry()
        }
    }
}

fn builtin_registry() -> anyhow::Result<SchemaRegistry> {
    SchemaRegistry::with_default_catalog().context("the built-in schema catalog is invalid")
}

struct Session {
    rows: RowTree,
    translator: Translator,
}

impl Session {
    fn new(registry: Arc<SchemaRegistry>) -> anyhow::Result<Self> {
        Ok(Self {
            rows: RowTree::with_default_cuq(registry.clone())?,
            translator: Translator::new(registry),
        })
    }

    /// Run one command line. Returns `false` when the session should end.
    fn execute(&mut self, line: &str) -> anyhow::Result<bool> {
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "help" => println!("{}", HELP),
            "quit" | "exit" => return Ok(false),
            "show" => self.show()?,
            "expr" => println!("{}", self.translator.to_expression_tree(&self.rows)?),
            "classes" => {
                for class in self.rows.registry().possible_cuqs() {
                    println!("  {}", class.name());
                }
            }
            "cuq" if rest.is_empty() => println!("{}", self.rows.class_under_qualification()),
            "cuq" => self.rows.set_class_under_qualification(rest)?,
            "add" => {
                let parent = self.row(rest)?;
                self.rows.add_attribute_row(parent)?;
                self.show()?;
            }
            "group" => {
                let (row, op) = split_row(rest)?;
                let parent = self.row(row)?;
                let operator: CollectionOperator = op.parse().map_err(|e: String| anyhow!(e))?;
                self.rows.add_compound_row(parent, operator)?;
                self.show()?;
            }
            "choices" => {
                let id = self.row(rest)?;
                for attribute in self.rows.selectable_attributes(id)? {
                    println!("  {:<28} {}", attribute.query_name(), attribute.display_name());
                }
            }
            "attr" => {
                let (row, name) = split_row(rest)?;
                let id = self.row(row)?;
                let attribute = find_choice(self.rows.selectable_attributes(id)?, name)?;
                self.rows.set_childmost_attribute(id, attribute)?;
                self.show()?;
            }
            "at" => {
                let (row, rest) = split_row(rest)?;
                let (index, name) = split_row(rest)?;
                let id = self.row(row)?;
                let index: usize = index.parse().with_context(|| format!("bad path index `{}`", index))?;
                let class = self.rows.slot_class(id, index)?.name().to_string();
                let choices = self.rows.registry().selectable_attributes(&class, index)?;
                self.rows.set_attribute_at(id, index, find_choice(choices, name)?)?;
                self.show()?;
            }
            "coll" => {
                let (row, op) = split_row(rest)?;
                let id = self.row(row)?;
                let operator: CollectionOperator = op.parse().map_err(|e: String| anyhow!(e))?;
                self.rows.set_collection_operator(id, operator)?;
            }
            "op" => {
                let (row, op) = split_row(rest)?;
                let id = self.row(row)?;
                self.rows.set_attribute_operator(id, op)?;
            }
            "val" => {
                let (row, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let id = self.row(row)?;
                self.rows.set_attribute_value(id, value.trim())?;
            }
            "ptype" => {
                let (row, ty) = split_row(rest)?;
                let id = self.row(row)?;
                let ty: Type = ty.parse().map_err(|e: String| anyhow!(e))?;
                self.rows.set_prop_type(id, ty)?;
            }
            "pname" => {
                let (row, name) = split_row(rest)?;
                let id = self.row(row)?;
                self.rows.set_prop_name(id, name)?;
            }
            "rm" => {
                let id = self.row(rest)?;
                self.rows.remove_row(id)?;
                self.show()?;
            }
            "save" if !rest.is_empty() => {
                let bytes = envelope::save(&self.rows)?;
                fs::write(rest, bytes).with_context(|| format!("cannot write {}", rest))?;
                info!(path = rest, "filter saved");
            }
            "load" if !rest.is_empty() => {
                let bytes = fs::read(rest).with_context(|| format!("cannot read {}", rest))?;
                self.rows = envelope::load(&bytes, self.rows.registry().clone())?;
                info!(path = rest, "filter loaded");
                self.show()?;
            }
            other => bail!("unknown command `{}`; type `help`", other),
        }
        Ok(true)
    }

    /// The row shown at position `text` by `show`.
    fn row(&self, text: &str) -> anyhow::Result<RowId> {
        let index: usize = text.parse().with_context(|| format!("bad row number `{}`", text))?;
        self.rows
            .rows()
            .get(index)
            .copied()
            .ok_or_else(|| anyhow!("there is no row {}", index))
    }

    fn show(&self) -> anyhow::Result<()> {
        for (index, id) in self.rows.rows().into_iter().enumerate() {
            let indent = "  ".repeat(self.rows.depth(id)?);
            println!("{:>3} {}{}", index, indent, describe(&self.rows, id)?);
        }
        Ok(())
    }
}

fn split_row(text: &str) -> anyhow::Result<(&str, &str)> {
    text.split_once(char::is_whitespace)
        .map(|(row, rest)| (row, rest.trim()))
        .filter(|(_, rest)| !rest.is_empty())
        .ok_or_else(|| anyhow!("expected a row number followed by an argument"))
}

fn find_choice(choices: Vec<Attribute>, name: &str) -> anyhow::Result<Attribute> {
    choices
        .into_iter()
        .find(|a| a.query_name() == name)
        .ok_or_else(|| anyhow!("`{}` is not selectable here; see `choices`", name))
}

/// One line of `show` output.
fn describe(rows: &RowTree, id: RowId) -> anyhow::Result<String> {
    let row = match rows.content(id)? {
        RowContent::Root {
            class_under_qualification,
            operator,
        } => return Ok(format!("{} where {} of", class_under_qualification, operator)),
        RowContent::Compound { operator } => return Ok(format!("{} of", operator)),
        RowContent::Attribute(row) => row,
    };

    let path: Vec<&str> = row.path().iter().map(|a| a.display_name()).collect();
    let mut line = path.join(" > ");
    match row.shape() {
        RowShape::Incomplete => {}
        RowShape::ToMany => {
            if let Some(op) = row.collection_operator() {
                line.push_str(&format!(" [{}]", op));
            }
        }
        RowShape::Property(_) => {
            line.push_str(&format!(
                " \"{}\" ({})",
                row.prop_name().unwrap_or_default(),
                row.prop_type().map(|t| t.as_str()).unwrap_or_default()
            ));
        }
        RowShape::Primitive(_) | RowShape::NullCheck { .. } => {}
    }
    if let (Some(op), false) = (row.attribute_operator(), matches!(row.shape(), RowShape::NullCheck { .. })) {
        line.push_str(&format!(" {}", op));
    }
    if let Some(value) = row.value() {
        line.push_str(&format!(" {:?}", value));
    }
    Ok(line)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let registry = Arc::new(load_registry(std::env::args().nth(1))?);
    let mut session = Session::new(registry)?;

    println!("Filter builder. Type `help` for commands.");
    session.show()?;

    let mut rl = DefaultEditor::new().context("failed to initialize line editor")?;
    loop {
        let prompt = format!("{}> ", session.rows.class_under_qualification());
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);
                match session.execute(trimmed) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("error: {:#}", e),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => println!(),
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {}", e);
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(Arc::new(SchemaRegistry::with_default_catalog().unwrap())).unwrap()
    }

    #[test]
    fn test_commands_build_a_filter() {
        let mut s = session();
        for line in [
            "add 0",
            "attr 1 epochGroup",
            "attr 1 source",
            "attr 1 label",
            "val 1 X123",
        ] {
            assert!(s.execute(line).unwrap(), "{}", line);
        }
        let tree = s.translator.to_expression_tree(&s.rows).unwrap();
        assert_eq!(tree.to_string(), r#"Epoch: or(==(@epochGroup.source.label, "X123"))"#);
    }

    #[test]
    fn test_multi_word_operator() {
        let mut s = session();
        s.execute("add 0").unwrap();
        s.execute("attr 1 excludeFromAnalysis").unwrap();
        s.execute("op 1 is false").unwrap();
        let id = s.row("1").unwrap();
        assert_eq!(s.rows.attribute_operator(id).unwrap(), Some("is false"));
        assert_eq!(describe(&s.rows, id).unwrap(), "Exclude from Analysis is false");
    }

    #[test]
    fn test_bad_input_is_reported() {
        let mut s = session();
        assert!(s.execute("attr 9 label").is_err());
        assert!(s.execute("frobnicate").is_err());
        assert!(s.execute("group 0 count").is_err());
        assert!(!s.execute("quit").unwrap());
    }

    #[test]
    fn test_missing_schema_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let registry = load_registry(Some(path.display().to_string())).unwrap();
        assert!(registry.is_initialized());
        assert!(registry.is_possible_cuq("Epoch"));
    }

    #[test]
    fn test_save_and_load_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.json");
        let mut s = session();
        s.execute("add 0").unwrap();
        s.execute("attr 1 my_property").unwrap();
        s.execute("pname 1 temperature").unwrap();
        s.execute("val 1 37").unwrap();
        s.execute(&format!("save {}", path.display())).unwrap();

        let mut other = session();
        other.execute(&format!("load {}", path.display())).unwrap();
        assert_eq!(other.rows.snapshot(), s.rows.snapshot());
    }
}
