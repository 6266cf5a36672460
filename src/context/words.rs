//! Russian cardinal numerals.

const UNITS: [&str; 10] = [
    "", "один", "два", "три", "четыре", "пять", "шесть", "семь", "восемь", "девять",
];
const UNITS_FEMININE: [&str; 10] = [
    "", "одна", "две", "три", "четыре", "пять", "шесть", "семь", "восемь", "девять",
];
const TEENS: [&str; 10] = [
    "десять",
    "одиннадцать",
    "двенадцать",
    "тринадцать",
    "четырнадцать",
    "пятнадцать",
    "шестнадцать",
    "семнадцать",
    "восемнадцать",
    "девятнадцать",
];
const TENS: [&str; 10] = [
    "",
    "",
    "двадцать",
    "тридцать",
    "сорок",
    "пятьдесят",
    "шестьдесят",
    "семьдесят",
    "восемьдесят",
    "девяносто",
];
const HUNDREDS: [&str; 10] = [
    "",
    "сто",
    "двести",
    "триста",
    "четыреста",
    "пятьсот",
    "шестьсот",
    "семьсот",
    "восемьсот",
    "девятьсот",
];

/// Scale words in the three plural forms (one, few, many).
const SCALES: [[&str; 3]; 6] = [
    ["тысяча", "тысячи", "тысяч"],
    ["миллион", "миллиона", "миллионов"],
    ["миллиард", "миллиарда", "миллиардов"],
    ["триллион", "триллиона", "триллионов"],
    ["квадриллион", "квадриллиона", "квадриллионов"],
    ["квинтиллион", "квинтиллиона", "квинтиллионов"],
];

fn plural_form(n: u64) -> usize {
    let last_two = n % 100;
    let last = n % 10;
    if (11..=14).contains(&last_two) {
        2
    } else if last == 1 {
        0
    } else if (2..=4).contains(&last) {
        1
    } else {
        2
    }
}

fn push_triad(words: &mut Vec<&'static str>, n: u64, feminine: bool) {
    let hundreds = (n / 100) as usize;
    let rest = n % 100;
    if hundreds > 0 {
        words.push(HUNDREDS[hundreds]);
    }
    if (10..20).contains(&rest) {
        words.push(TEENS[(rest - 10) as usize]);
        return;
    }
    if rest >= 20 {
        words.push(TENS[(rest / 10) as usize]);
    }
    let unit = (rest % 10) as usize;
    if unit > 0 {
        words.push(if feminine { UNITS_FEMININE[unit] } else { UNITS[unit] });
    }
}

/// Spells `n` out in Russian, masculine gender (`21 → "двадцать один"`).
pub fn number_to_words(n: i64) -> String {
    if n == 0 {
        return "ноль".to_string();
    }

    let mut words = Vec::new();
    if n < 0 {
        words.push("минус");
    }

    let mut value = n.unsigned_abs();
    let mut groups = Vec::new();
    while value > 0 {
        groups.push(value % 1000);
        value /= 1000;
    }

    for (scale, group) in groups.iter().enumerate().rev() {
        if *group == 0 {
            continue;
        }
        // Thousands are feminine: "одна тысяча", "две тысячи".
        push_triad(&mut words, *group, scale == 1);
        if scale > 0 {
            words.push(SCALES[scale - 1][plural_form(*group)]);
        }
    }

    words.join(" ")
}
