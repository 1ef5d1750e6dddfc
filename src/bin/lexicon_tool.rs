use clap::{Arg, Command};
use word_mines::config::Config;
use word_mines::lexicon::WordList;

const DEFAULT_PATH: &str = "words.txt";

fn main() {
    let matches = Command::new("词表管理器")
        .version("1.0")
        .about("管理单词地雷游戏的词表")
        .arg(
            Arg::new("file")
                .long("file")
                .short('f')
                .takes_value(true)
                .global(true)
                .help("词表文件路径，默认读取配置中的 lexicon.path"),
        )
        .subcommand(
            Command::new("list").about("列出单词").arg(
                Arg::new("prefix")
                    .help("只列出以该前缀开头的单词")
                    .index(1),
            ),
        )
        .subcommand(
            Command::new("add").about("添加单词").arg(
                Arg::new("words")
                    .help("要添加的单词")
                    .required(true)
                    .multiple_values(true)
                    .index(1),
            ),
        )
        .subcommand(Command::new("stats").about("显示词表统计信息"))
        .subcommand(Command::new("validate").about("验证词表完整性"))
        .subcommand(
            Command::new("export").about("导出词表到文件").arg(
                Arg::new("output")
                    .help("输出文件路径")
                    .required(true)
                    .index(1),
            ),
        )
        .get_matches();

    let path = match matches.value_of("file") {
        Some(path) => path.to_string(),
        None => match Config::load() {
            Ok(config) => config
                .lexicon
                .path
                .unwrap_or_else(|| DEFAULT_PATH.to_string()),
            Err(e) => {
                eprintln!("配置加载失败: {}", e);
                return;
            }
        },
    };

    // add 允许从空文件开始
    let mut words = match WordList::load_from_file(&path) {
        Ok(words) => words,
        Err(_) if matches!(matches.subcommand(), Some(("add", _))) => WordList::new(),
        Err(e) => {
            eprintln!("加载词表失败: {}", e);
            return;
        }
    };

    match matches.subcommand() {
        Some(("list", args)) => {
            let prefix = args.value_of("prefix").unwrap_or("").to_uppercase();
            let mut count = 0;
            for word in words.words().filter(|w| w.starts_with(&prefix)) {
                println!("  {}", word);
                count += 1;
            }
            println!("共 {} 个单词", count);
        }
        Some(("add", args)) => {
            let mut added = 0;
            for word in args.values_of("words").into_iter().flatten() {
                if words.add_word(word) {
                    added += 1;
                } else {
                    println!("跳过已存在或无效的单词: {}", word);
                }
            }

            if let Err(e) = words.save_to_file(&path) {
                eprintln!("保存词表失败: {}", e);
            } else {
                println!("成功添加 {} 个单词，词表共 {} 个", added, words.len());
            }
        }
        Some(("stats", _)) => {
            let stats = words.get_stats();
            println!("词表统计信息:");
            println!("  总单词数: {}", stats.total_words);
            println!("  长度分布:");
            for (length, count) in &stats.by_length {
                println!("    {} 个字母: {}", length, count);
            }
            println!("  首字母分布:");
            for (initial, count) in &stats.by_initial {
                println!("    {}: {}", initial, count);
            }
        }
        Some(("validate", _)) => {
            let errors = words.validate();
            if errors.is_empty() {
                println!("词表验证通过！");
            } else {
                println!("词表验证发现 {} 个问题:", errors.len());
                for error in errors {
                    println!("  - {}", error);
                }
            }
        }
        Some(("export", args)) => {
            let output = args.value_of("output").unwrap_or(DEFAULT_PATH);
            if let Err(e) = words.save_to_file(output) {
                eprintln!("导出失败: {}", e);
            } else {
                println!("成功导出词表到: {}", output);
            }
        }
        _ => {
            println!("请使用 --help 查看可用命令");
        }
    }
}
